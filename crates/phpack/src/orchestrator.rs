//! Top-level bundling run
//!
//! Drives one complete run: merges every module's code files into the
//! application collection, folds module views into the generated views
//! fragment, preserves the entry-point directive, embeds the patched state
//! snapshot, reorders declarations, and assembles the final artifact. The
//! module registry and live-reflection data arrive as a TOML manifest —
//! they are produced by external collaborators, not by this crate.

use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::{
    assemble,
    collection::{CodeCollection, NS_GLOBAL, VIEWS},
    config::Config,
    error::BundleError,
    merge::Merger,
    order::{self, Declaration, DeclarationIndex},
    snapshot,
};

/// `start('<module>')` bootstrap directive in the entry file.
static START_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)start\(\s*['"]([^'"]+)"#).expect("start directive pattern compiles")
});

/// File lists of one application module, as supplied by the module
/// registry collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleSources {
    /// Module identifier; `local` is the application's own module
    pub id: String,
    /// Module root, file lists below resolve relative to it
    pub path: PathBuf,
    pub php: Vec<PathBuf>,
    pub controllers: Vec<PathBuf>,
    pub models: Vec<PathBuf>,
    pub views: Vec<PathBuf>,
}

impl Default for ModuleSources {
    fn default() -> Self {
        Self {
            id: "local".to_owned(),
            path: PathBuf::from("."),
            php: Vec::new(),
            controllers: Vec::new(),
            models: Vec::new(),
            views: Vec::new(),
        }
    }
}

impl ModuleSources {
    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_owned()
        } else {
            self.path.join(file)
        }
    }

    /// Output-relative view key: module views are prefixed with the module
    /// id, except for the application's own `local` module.
    fn view_key(&self, view: &Path) -> String {
        let relative = view
            .strip_prefix(&self.path)
            .unwrap_or(view)
            .display()
            .to_string()
            .replace('\\', "/");
        if self.id == "local" {
            relative
        } else {
            format!("{}/{relative}", self.id)
        }
    }
}

/// Declared types of the running application, in load order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeclarationManifest {
    pub interfaces: Vec<Declaration>,
    pub classes: Vec<Declaration>,
}

impl DeclarationManifest {
    pub fn index(&self) -> DeclarationIndex {
        DeclarationIndex::from_declarations(&self.interfaces, &self.classes)
    }
}

/// Everything one bundling run consumes besides the configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BundleManifest {
    /// Entry file holding the `start('...')` directive
    pub entry: PathBuf,
    #[serde(rename = "module")]
    pub modules: Vec<ModuleSources>,
    pub declarations: DeclarationManifest,
    /// Serialized application state blob from the snapshot provider
    pub snapshot: Option<PathBuf>,
}

impl BundleManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read manifest {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid manifest {}", path.display()))
    }
}

/// Hook for the external view pipeline (minification, render stack);
/// receives raw view HTML and returns the text to embed.
pub type ViewRewriter = Box<dyn Fn(&str) -> String>;

/// One bundling run. Owns the merger's visited set and the code
/// collection; construct a fresh bundler per run.
pub struct Bundler {
    config: Config,
    merger: Merger,
    collection: CodeCollection,
    errors: Vec<BundleError>,
    view_rewriter: Option<ViewRewriter>,
}

impl std::fmt::Debug for Bundler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundler")
            .field("config", &self.config)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Bundler {
    pub fn new(config: Config) -> Self {
        let merger = Merger::new(&config);
        Self {
            config,
            merger,
            collection: CodeCollection::new(),
            errors: Vec::new(),
            view_rewriter: None,
        }
    }

    /// Install the view pipeline hook; identity when absent.
    pub fn with_view_rewriter(mut self, rewriter: ViewRewriter) -> Self {
        self.view_rewriter = Some(rewriter);
        self
    }

    /// Non-fatal errors accumulated during the run, in discovery order.
    pub fn errors(&self) -> &[BundleError] {
        &self.errors
    }

    /// Produce the complete artifact text. Merge-phase problems degrade
    /// the output and are reported through [`Bundler::errors`]; assembly
    /// and snapshot failures abort.
    pub fn bundle(&mut self, manifest: &BundleManifest) -> Result<String> {
        let flatten = self.config.flatten();
        info!(
            "bundling {} modules (flatten: {flatten})",
            manifest.modules.len()
        );

        let mut views = String::from("\n$GLOBALS[\"__compressor_files\"] = array();");

        for module in &manifest.modules {
            debug!("bundling module '{}' from {}", module.id, module.path.display());
            let mut local = CodeCollection::new();
            for file in module
                .php
                .iter()
                .chain(&module.controllers)
                .chain(&module.models)
            {
                self.merger
                    .merge(&module.resolve(file), NS_GLOBAL, &mut local);
            }
            for view in &module.views {
                self.register_view(module, view, flatten, &mut views);
            }
            self.collection.absorb(local);
        }

        // The entry file may already have arrived through a module list or
        // an inclusion; the visited set makes this a no-op then.
        self.merger
            .merge(&manifest.entry, NS_GLOBAL, &mut self.collection);

        views.push_str(&format!(
            "\n\\samson\\core\\Error::$OUTPUT = {};",
            !self.config.no_errors
        ));

        if let Some(snapshot_path) = &manifest.snapshot {
            let blob = fs::read_to_string(snapshot_path)
                .with_context(|| format!("cannot read snapshot {}", snapshot_path.display()))?;
            views.push_str(&self.snapshot_constant(&blob, flatten)?);
        }

        self.preserve_entry_point(&manifest.entry, &mut views);

        self.collection
            .bucket_mut(NS_GLOBAL)
            .set_file(VIEWS, views);
        self.collection.finalize_layout();
        order::reorder(&mut self.collection, &manifest.declarations.index());

        let code = assemble::assemble(&self.collection, flatten)?;
        self.errors.extend(self.merger.take_errors());
        Ok(format!("<?php {code}\n?>"))
    }

    /// Atomically publish the artifact: nothing lands at `output` until
    /// the full text is on disk.
    pub fn write_artifact(&self, text: &str, output: &Path) -> Result<()> {
        let parent = output.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create output directory {}", dir.display()))?;
        }
        let dir = parent.unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).context("cannot create temporary artifact")?;
        tmp.write_all(text.as_bytes())
            .context("cannot write artifact")?;
        tmp.persist(output)
            .with_context(|| format!("cannot publish artifact {}", output.display()))?;
        info!("artifact written to {}", output.display());
        Ok(())
    }

    /// Fold one view into the generated views fragment. In legacy
    /// (flattened) mode the artifact stores the view's relative path for
    /// array rendering; otherwise the view HTML is embedded as a nowdoc.
    fn register_view(
        &mut self,
        module: &ModuleSources,
        view: &Path,
        flatten: bool,
        views: &mut String,
    ) {
        let path = module.resolve(view);
        let html = match fs::read_to_string(&path) {
            Ok(html) => html,
            Err(err) => {
                warn!("cannot read view {}: {err}", path.display());
                self.errors.push(BundleError::FileNotFound(path));
                return;
            }
        };
        let key = module.view_key(view);
        debug!("registering view {} as '{key}'", path.display());
        let html = match &self.view_rewriter {
            Some(rewrite) => rewrite(&html),
            None => html,
        };
        let value = if flatten {
            format!("'{key}';")
        } else {
            format!("<<<'EOT'\n{html}\nEOT;")
        };
        views.push_str(&format!(
            "\n$GLOBALS[\"__compressor_files\"][\"{key}\"] = {value}"
        ));
    }

    /// Replace the framework entry point with a plain `start()` call at
    /// the very end of the artifact, and blank the entry fragment so the
    /// bootstrap runs exactly once.
    fn preserve_entry_point(&mut self, entry: &Path, views: &mut String) {
        let key = entry
            .canonicalize()
            .unwrap_or_else(|_| entry.to_owned())
            .display()
            .to_string();
        let bucket = self.collection.bucket_mut(NS_GLOBAL);
        let Some(code) = bucket.file(&key) else {
            warn!("entry file {} produced no merged fragment", entry.display());
            self.errors
                .push(BundleError::UnresolvedEntryPoint(entry.to_owned()));
            return;
        };
        match START_DIRECTIVE.captures(code) {
            Some(caps) => {
                let default_module = caps[1].to_owned();
                debug!("preserving entry point start('{default_module}')");
                views.push_str(&format!("\ns()->start('{default_module}');"));
                bucket.set_file(&key, String::new());
            }
            None => {
                warn!(
                    "no start('...') directive in {}, artifact bootstrap may be incomplete",
                    entry.display()
                );
                self.errors
                    .push(BundleError::UnresolvedEntryPoint(entry.to_owned()));
            }
        }
    }

    fn snapshot_constant(&self, blob: &str, flatten: bool) -> Result<String> {
        let patched = if flatten {
            snapshot::patch(blob, |name| snapshot::unqualified_name(name).to_owned())?
        } else {
            // Qualified names survive namespaced output; the blob is
            // embedded unmodified.
            blob.to_owned()
        };
        Ok(format!(
            "\n$GLOBALS[\"__CORE_SNAPSHOT\"] = '{}';",
            BASE64.encode(patched)
        ))
    }
}
