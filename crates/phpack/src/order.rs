//! Declaration order resolver
//!
//! When output is flattened there are no namespace blocks left to isolate
//! declarations, so the single merged file must declare supertypes before
//! subtypes. The index replays the load order of a live PHP instance
//! (interfaces first, then classes) into each namespace bucket: declared
//! files are pulled to the front in index order, everything else keeps its
//! relative position. A stable partial reordering, not a topological sort —
//! the runtime's own load order is trusted to satisfy all dependencies.

use std::{hash::BuildHasherDefault, path::Path};

use indexmap::IndexMap;
use log::debug;
use rustc_hash::FxHasher;
use serde::Deserialize;

use crate::collection::CodeCollection;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// One declared type as reported by the live-reflection collaborator:
/// fully qualified name plus the file that declares it.
#[derive(Debug, Clone, Deserialize)]
pub struct Declaration {
    /// Fully qualified type name, e.g. `samson\core\iModule`
    pub name: String,
    /// Path of the declaring source file
    pub file: std::path::PathBuf,
}

/// Ordered mapping of namespace to declaring files, in load order.
#[derive(Debug, Default, Clone)]
pub struct DeclarationIndex {
    by_namespace: FxIndexMap<String, Vec<String>>,
}

impl DeclarationIndex {
    /// Build an index from interface and class declarations; interfaces
    /// come first, mirroring the order a running instance loads them.
    pub fn from_declarations(interfaces: &[Declaration], classes: &[Declaration]) -> Self {
        let mut index = Self::default();
        for decl in interfaces.iter().chain(classes) {
            index.insert(&decl.name, &decl.file);
        }
        index
    }

    /// Record that `file` declares the qualified type `name`. Types in the
    /// global namespace carry no ordering constraint and are skipped.
    pub fn insert(&mut self, name: &str, file: &Path) {
        let Some((namespace, _)) = name.rsplit_once('\\') else {
            return;
        };
        let namespace = namespace.trim_start_matches('\\').to_lowercase();
        if namespace.is_empty() {
            return;
        }
        let key = file
            .canonicalize()
            .unwrap_or_else(|_| file.to_owned())
            .display()
            .to_string();
        let files = self.by_namespace.entry(namespace).or_default();
        if !files.contains(&key) {
            files.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_namespace.is_empty()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.by_namespace.keys().map(String::as_str)
    }
}

/// Re-sequence each namespace bucket so declaring files precede the rest.
/// Namespaces absent from the index keep their insertion order.
pub fn reorder(collection: &mut CodeCollection, index: &DeclarationIndex) {
    for (namespace, files) in &index.by_namespace {
        if collection.bucket(namespace).is_none() {
            debug!("declaration index names unknown namespace '{namespace}'");
            continue;
        }
        collection.bucket_mut(namespace).reorder_files(files);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    fn decl(name: &str, file: &str) -> Declaration {
        Declaration {
            name: name.to_owned(),
            file: PathBuf::from(file),
        }
    }

    fn bucket_order(collection: &CodeCollection, ns: &str) -> Vec<String> {
        collection
            .bucket(ns)
            .expect("bucket")
            .files()
            .map(|(k, _)| k.to_owned())
            .collect()
    }

    #[test]
    fn declared_files_lead_in_index_order() {
        let mut collection = CodeCollection::new();
        for key in ["/n/other.php", "/n/iface.php", "/n/base.php", "/n/sub.php"] {
            collection.bucket_mut("n").set_file(key, key.to_owned());
        }
        let index = DeclarationIndex::from_declarations(
            &[decl("n\\iThing", "/n/iface.php")],
            &[decl("n\\Base", "/n/base.php"), decl("n\\Sub", "/n/sub.php")],
        );
        reorder(&mut collection, &index);
        assert_eq!(
            bucket_order(&collection, "n"),
            vec!["/n/iface.php", "/n/base.php", "/n/sub.php", "/n/other.php"]
        );
    }

    #[test]
    fn namespaces_missing_from_index_keep_insertion_order() {
        let mut collection = CodeCollection::new();
        collection.bucket_mut("a").set_file("/a/2.php", String::new());
        collection.bucket_mut("a").set_file("/a/1.php", String::new());
        reorder(&mut collection, &DeclarationIndex::default());
        assert_eq!(bucket_order(&collection, "a"), vec!["/a/2.php", "/a/1.php"]);
    }

    #[test]
    fn global_namespace_declarations_are_skipped() {
        let mut index = DeclarationIndex::default();
        index.insert("PlainClass", Path::new("/x/plain.php"));
        index.insert("\\AlsoGlobal", Path::new("/x/also.php"));
        assert!(index.is_empty());
    }

    #[test]
    fn multiple_declarations_per_file_collapse() {
        let mut index = DeclarationIndex::default();
        index.insert("n\\A", Path::new("/n/both.php"));
        index.insert("n\\B", Path::new("/n/both.php"));
        let mut collection = CodeCollection::new();
        collection.bucket_mut("n").set_file("/n/x.php", String::new());
        collection.bucket_mut("n").set_file("/n/both.php", String::new());
        reorder(&mut collection, &index);
        assert_eq!(bucket_order(&collection, "n"), vec!["/n/both.php", "/n/x.php"]);
    }
}
