//! Serialized snapshot patcher
//!
//! The application state snapshot is a PHP `serialize()` blob in which
//! every object record carries a length-prefixed class name,
//! `O:<len>:"<name>"`. When the assembler flattens namespaces away those
//! class names no longer exist, so each field is rewritten with the
//! resolver-supplied replacement and a freshly computed length prefix. The
//! blob is never parsed as a structured graph — only this one field shape
//! is pattern-matched — and the length is always recomputed from the byte
//! length of the new name, never copied from the old field.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::BundleError;

static OBJECT_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"O:(\d+):"([^"]+)""#).expect("object field pattern compiles")
});

/// Rewrite every type-name field in `blob` through `resolver`. Fatal on
/// any inconsistency: a corrupted length prefix must never be emitted.
pub fn patch<F>(blob: &str, resolver: F) -> Result<String, BundleError>
where
    F: Fn(&str) -> String,
{
    let mut output = String::with_capacity(blob.len());
    let mut last = 0;
    for caps in OBJECT_FIELD.captures_iter(blob) {
        let whole = caps.get(0).expect("whole match");
        let declared: usize = caps[1]
            .parse()
            .map_err(|_| BundleError::Snapshot(format!("unparsable length prefix in `{}`", &caps[0])))?;
        let name = &caps[2];
        if declared != name.len() {
            return Err(BundleError::Snapshot(format!(
                "length prefix {declared} does not match name `{name}` ({} bytes)",
                name.len()
            )));
        }
        let replacement = resolver(name);
        if replacement.is_empty() || replacement.contains('"') {
            return Err(BundleError::Snapshot(format!(
                "resolver produced invalid type name `{replacement}` for `{name}`"
            )));
        }
        output.push_str(&blob[last..whole.start()]);
        output.push_str("O:");
        output.push_str(&replacement.len().to_string());
        output.push_str(":\"");
        output.push_str(&replacement);
        output.push('"');
        last = whole.end();
    }
    output.push_str(&blob[last..]);
    Ok(output)
}

/// Flattened form of a qualified class name: the text after the last
/// namespace separator.
pub fn unqualified_name(name: &str) -> &str {
    name.rsplit('\\').next().unwrap_or(name)
}
