//! Bundler configuration
//!
//! Loaded from `phpack.toml` — an explicit path wins over the project
//! file, which wins over the user configuration directory. The only
//! settings the core consumes are the target PHP version (which derives
//! the flattening decision), the strip-marker pair for the dev-block
//! pre-pass, the compile-time constant table, and the recursion guard.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use etcetera::{BaseStrategy, choose_base_strategy};
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;

/// First PHP version with namespace support; older targets get
/// flattened output.
const NAMESPACE_SUPPORT_VERSION: &str = "5.3.0";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Target PHP version of the produced artifact
    pub php_version: String,
    /// Begin marker of a strip-in-production block
    pub strip_marker_start: String,
    /// End marker of a strip-in-production block
    pub strip_marker_end: String,
    /// Compile-time constants substituted literally inside `use`,
    /// `namespace` and inclusion statements
    pub constants: IndexMap<String, String>,
    /// Guard against unbounded inclusion recursion
    pub max_include_depth: usize,
    /// Disable error output in the produced artifact
    pub no_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            php_version: "5.4.0".to_owned(),
            strip_marker_start: "//[PHPCOMPRESSOR(remove,start)]".to_owned(),
            strip_marker_end: "//[PHPCOMPRESSOR(remove,end)]".to_owned(),
            constants: IndexMap::new(),
            max_include_depth: 64,
            no_errors: false,
        }
    }
}

impl Config {
    /// Load configuration: `explicit` path, then `./phpack.toml`, then the
    /// user configuration directory; defaults when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let project = Path::new("phpack.toml");
        if project.is_file() {
            return Self::from_file(project);
        }
        if let Ok(strategy) = choose_base_strategy() {
            let user = strategy.config_dir().join("phpack").join("phpack.toml");
            if user.is_file() {
                return Self::from_file(&user);
            }
        }
        debug!("no phpack.toml found, using defaults");
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        debug!("loading config from {}", path.display());
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Whether output must be flattened: targets without namespace
    /// support get a single namespace-free file.
    pub fn flatten(&self) -> bool {
        version_lt(&self.php_version, NAMESPACE_SUPPORT_VERSION)
    }
}

/// Dotted-version comparison in the manner of PHP's `version_compare`:
/// segmentwise numeric, missing segments count as zero.
fn version_lt(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '-', '+'])
            .map(|seg| seg.parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    for i in 0..a.len().max(b.len()) {
        let (x, y) = (
            a.get(i).copied().unwrap_or(0),
            b.get(i).copied().unwrap_or(0),
        );
        if x != y {
            return x < y;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn flatten_derives_from_target_version() {
        let mut config = Config::default();
        assert!(!config.flatten());
        config.php_version = "5.2.17".to_owned();
        assert!(config.flatten());
        config.php_version = "5.3.0".to_owned();
        assert!(!config.flatten());
        config.php_version = "7".to_owned();
        assert!(!config.flatten());
    }

    #[test]
    fn version_compare_is_segmentwise_numeric() {
        assert!(version_lt("5.2.9", "5.10.0"));
        assert!(!version_lt("5.10.0", "5.2.9"));
        assert!(version_lt("5.3", "5.3.1"));
        assert!(!version_lt("5.3.0", "5.3"));
    }

    #[test]
    fn config_parses_from_toml() {
        let config: Config = toml::from_str(
            r#"
            php_version = "5.2.0"
            no_errors = true
            max_include_depth = 8

            [constants]
            __SAMSON_CWD__ = "'/var/www/app/'"
            "#,
        )
        .expect("parses");
        assert!(config.flatten());
        assert!(config.no_errors);
        assert_eq!(config.max_include_depth, 8);
        assert_eq!(
            config.constants.get("__SAMSON_CWD__").map(String::as_str),
            Some("'/var/www/app/'")
        );
        // Unset fields keep their defaults.
        assert_eq!(config.strip_marker_start, "//[PHPCOMPRESSOR(remove,start)]");
    }
}
