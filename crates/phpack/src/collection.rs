//! Namespace-keyed code collection built by the merge engine
//!
//! This is the shared state of one bundling run: per-namespace buckets of
//! deduplicated `use` aliases and an ordered map of source path to merged
//! code fragment. Insertion order is load-bearing — the assembler emits
//! fragments in bucket order, and the declaration order resolver rewrites
//! that order in place.

use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Key of the global (unnamespaced) bucket.
pub const NS_GLOBAL: &str = "";

/// Pseudo-file key for the generated views fragment; always emitted last.
pub const VIEWS: &str = "views";

/// Per-namespace bucket of import aliases and merged file fragments.
#[derive(Debug, Default, Clone)]
pub struct NamespaceBucket {
    /// Deduplicated `use` aliases, lowercased with a canonical leading `\`
    uses: FxIndexSet<String>,
    /// Merged code keyed by canonical source path, in insertion order
    files: FxIndexMap<String, String>,
}

impl NamespaceBucket {
    /// Record an import alias; lowercases and prepends the root qualifier,
    /// so case variants of one alias collapse to a single entry.
    pub fn add_use(&mut self, alias: &str) {
        let mut canonical = alias.to_lowercase();
        if !canonical.starts_with('\\') {
            canonical.insert(0, '\\');
        }
        self.uses.insert(canonical);
    }

    /// Store a merged fragment, appending when the key is already present
    /// (module-local collections absorbed twice land on the same file key).
    pub fn append_file(&mut self, key: &str, code: &str) {
        match self.files.get_mut(key) {
            Some(existing) => existing.push_str(code),
            None => {
                self.files.insert(key.to_owned(), code.to_owned());
            }
        }
    }

    /// Replace a fragment wholesale.
    pub fn set_file(&mut self, key: &str, code: String) {
        self.files.insert(key.to_owned(), code);
    }

    /// Move the fragment under `key` to the end of the bucket, keeping the
    /// relative order of everything else.
    pub fn move_file_last(&mut self, key: &str) {
        if let Some(code) = self.files.shift_remove(key) {
            self.files.insert(key.to_owned(), code);
        }
    }

    /// Rebuild file order: the given keys first, in the order given, then
    /// all remaining files in their original relative order.
    pub(crate) fn reorder_files(&mut self, first: &[String]) {
        let mut ordered = FxIndexMap::default();
        for key in first {
            if let Some(code) = self.files.shift_remove(key) {
                ordered.insert(key.clone(), code);
            }
        }
        ordered.extend(self.files.drain(..));
        self.files = ordered;
    }

    pub fn uses(&self) -> impl Iterator<Item = &str> {
        self.uses.iter().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn contains_file(&self, key: &str) -> bool {
        self.files.contains_key(key)
    }

    pub fn file(&self, key: &str) -> Option<&str> {
        self.files.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.uses.is_empty() && self.files.is_empty()
    }
}

/// All merged code of one bundling run, keyed by namespace.
///
/// Exclusively owned by the run; construct a fresh collection per run so a
/// stale visited state can never suppress re-inlining of changed files.
#[derive(Debug, Clone)]
pub struct CodeCollection {
    buckets: FxIndexMap<String, NamespaceBucket>,
}

impl Default for CodeCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeCollection {
    /// Create a collection with the (always present) global bucket.
    pub fn new() -> Self {
        let mut buckets = FxIndexMap::default();
        buckets.insert(NS_GLOBAL.to_owned(), NamespaceBucket::default());
        Self { buckets }
    }

    /// Fetch a bucket, creating it (with an empty alias set) on first use.
    pub fn bucket_mut(&mut self, namespace: &str) -> &mut NamespaceBucket {
        self.buckets.entry(namespace.to_owned()).or_default()
    }

    pub fn bucket(&self, namespace: &str) -> Option<&NamespaceBucket> {
        self.buckets.get(namespace)
    }

    /// Iterate buckets in collection order.
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &NamespaceBucket)> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Fold a module-local collection into this one: alias sets are
    /// unioned, duplicate file keys are appended in arrival order.
    pub fn absorb(&mut self, other: CodeCollection) {
        for (ns, bucket) in other.buckets {
            let target = self.bucket_mut(&ns);
            for alias in bucket.uses {
                target.uses.insert(alias);
            }
            for (key, code) in bucket.files {
                target.append_file(&key, &code);
            }
        }
    }

    /// Final bucket layout: global namespace last, and within it the views
    /// fragment as the very last fragment of all.
    pub fn finalize_layout(&mut self) {
        if let Some(mut global) = self.buckets.shift_remove(NS_GLOBAL) {
            global.move_file_last(VIEWS);
            self.buckets.insert(NS_GLOBAL.to_owned(), global);
        }
    }
}
