//! Document assembler
//!
//! Serializes the merged namespace buckets into the final output text. Two
//! modes: namespace-preserving (each bucket wrapped in a `namespace <ns>{}`
//! block with its deduplicated `use` lines) and flattened, for pre-5.3
//! runtimes, where all namespace syntax is omitted and every namespace
//! qualifier is scrubbed from the accumulated text.

use anyhow::{Context, Result};
use log::debug;
use regex::RegexBuilder;

use crate::collection::{CodeCollection, NS_GLOBAL, NamespaceBucket};

/// Concatenate all buckets into one output string. The global bucket is
/// always emitted last regardless of collection order; within buckets,
/// fragments come out in bucket order (run `order::reorder` and
/// `CodeCollection::finalize_layout` first).
pub fn assemble(collection: &CodeCollection, flatten: bool) -> Result<String> {
    let mut output = String::new();
    let deferred_global = collection.bucket(NS_GLOBAL);
    for (namespace, bucket) in collection.buckets() {
        if namespace == NS_GLOBAL {
            continue;
        }
        emit_bucket(&mut output, namespace, bucket, flatten);
    }
    if let Some(global) = deferred_global {
        emit_bucket(&mut output, NS_GLOBAL, global, flatten);
    }
    if flatten {
        output = scrub_qualifiers(output, collection)?;
    }
    Ok(output)
}

fn emit_bucket(
    output: &mut String,
    namespace: &str,
    bucket: &NamespaceBucket,
    flatten: bool,
) {
    debug!(
        "assembling namespace '{namespace}' ({} fragments)",
        bucket.files().count()
    );
    if !flatten {
        output.push_str("\nnamespace ");
        output.push_str(namespace);
        output.push('{');
        for alias in bucket.uses() {
            output.push_str("\nuse ");
            output.push_str(alias);
            output.push(';');
        }
    }
    for (_, code) in bucket.files() {
        output.push_str(code);
    }
    if !flatten {
        output.push_str("\n}");
    }
}

/// Remove every qualified (`\ns\`) and bare (`ns\`) occurrence of each
/// non-global namespace prefix. Literal, case-insensitive replacement: a
/// namespace name occurring inside ordinary code text is corrupted too —
/// known limitation inherited from the replacement strategy.
fn scrub_qualifiers(mut output: String, collection: &CodeCollection) -> Result<String> {
    for namespace in collection.namespaces() {
        if namespace == NS_GLOBAL {
            continue;
        }
        debug!("clearing namespace qualifier: {namespace}");
        let pattern = format!(r"\\?{}\\", regex::escape(namespace));
        let re = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("bad namespace pattern for '{namespace}'"))?;
        output = re.replace_all(&output, "").into_owned();
    }
    Ok(output)
}
