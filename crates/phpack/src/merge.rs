//! Recursive lexical merge engine
//!
//! Inlines every file reachable through eager inclusion statements into a
//! namespace-keyed [`CodeCollection`], one fragment per source file. The
//! engine owns the run-scoped visited set (the sole cycle and duplicate
//! guard), accumulates non-fatal errors instead of propagating them, and
//! carries the active namespace across recursive descents.

use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, warn};
use rustc_hash::FxHashSet;

use crate::{
    collection::CodeCollection,
    config::Config,
    error::BundleError,
    lexer::{self, LexToken, TokenKind},
};

/// Stateful merger for one bundling run. Construct a fresh instance per
/// run; a stale visited set would silently suppress re-inlining of
/// changed files.
#[derive(Debug)]
pub struct Merger {
    strip_start: String,
    strip_end: String,
    constants: IndexMap<String, String>,
    max_depth: usize,
    visited: FxHashSet<PathBuf>,
    errors: Vec<BundleError>,
}

/// Outcome of scanning the token run that trails a statement keyword.
struct StatementScan {
    /// Resolved statement payload (constants substituted, whitespace and
    /// punctuation other than `\` dropped)
    resolved: String,
    /// Verbatim text of the whole statement, keyword included
    raw: String,
    /// Index just past the last consumed token
    next: usize,
    /// The terminator that ended the scan, if any
    terminator: Option<char>,
}

impl Merger {
    pub fn new(config: &Config) -> Self {
        Self {
            strip_start: config.strip_marker_start.clone(),
            strip_end: config.strip_marker_end.clone(),
            constants: config.constants.clone(),
            max_depth: config.max_include_depth,
            visited: FxHashSet::default(),
            errors: Vec::new(),
        }
    }

    /// Merge `path` and everything it eagerly includes into `collection`,
    /// starting in `namespace`. Never fails: problems are recorded and the
    /// run continues for sibling files.
    pub fn merge(&mut self, path: &Path, namespace: &str, collection: &mut CodeCollection) {
        self.merge_at(path, namespace, collection, 0);
    }

    /// Errors accumulated so far, in discovery order.
    pub fn errors(&self) -> &[BundleError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<BundleError> {
        std::mem::take(&mut self.errors)
    }

    pub fn has_visited(&self, path: &Path) -> bool {
        path.canonicalize()
            .is_ok_and(|canonical| self.visited.contains(&canonical))
    }

    fn merge_at(
        &mut self,
        path: &Path,
        namespace: &str,
        collection: &mut CodeCollection,
        depth: usize,
    ) {
        let Ok(canonical) = path.canonicalize() else {
            warn!("include target not found: {}", path.display());
            self.errors.push(BundleError::FileNotFound(path.to_owned()));
            return;
        };
        if self.visited.contains(&canonical) {
            debug!("already merged: {}", canonical.display());
            return;
        }
        if depth >= self.max_depth {
            warn!(
                "include depth limit ({}) reached at {}",
                self.max_depth,
                canonical.display()
            );
            self.errors.push(BundleError::DepthExceeded {
                path: canonical,
                limit: self.max_depth,
            });
            return;
        }
        let source = match fs::read_to_string(&canonical) {
            Ok(text) => text,
            Err(err) => {
                warn!("cannot read {}: {err}", canonical.display());
                self.errors.push(BundleError::FileNotFound(canonical));
                return;
            }
        };
        debug!("merging {} into namespace '{namespace}'", canonical.display());
        self.visited.insert(canonical.clone());

        let source = self.strip_dev_blocks(&source);
        let tokens: Vec<LexToken<'_>> = match lexer::tokenize(&source).collect() {
            Ok(tokens) => tokens,
            Err(source) => {
                warn!("cannot tokenize {}: {source}", canonical.display());
                self.errors.push(BundleError::Lex {
                    path: canonical,
                    source,
                });
                return;
            }
        };

        self.walk(&tokens, &canonical, namespace, collection, depth);
    }

    /// Remove text between strip-marker pairs. Textual pre-pass applied
    /// before tokenization; non-nesting, first match wins. A begin marker
    /// without a matching end marker is left in place.
    fn strip_dev_blocks(&self, src: &str) -> String {
        let mut out = String::with_capacity(src.len());
        let mut rest = src;
        while let Some(start) = rest.find(&self.strip_start) {
            let after_start = start + self.strip_start.len();
            let Some(end) = rest[after_start..].find(&self.strip_end) else {
                break;
            };
            out.push_str(&rest[..start]);
            rest = &rest[after_start + end + self.strip_end.len()..];
        }
        out.push_str(rest);
        out
    }

    /// Token walk of one file. Verbatim code accumulates into a single
    /// fragment which is stored under the namespace active at end of file.
    fn walk(
        &mut self,
        tokens: &[LexToken<'_>],
        path: &Path,
        namespace: &str,
        collection: &mut CodeCollection,
        depth: usize,
    ) {
        let mut namespace = namespace.to_lowercase();
        let mut fragment = format!("\n// {}\n", path.display());
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            match token.kind {
                _ if token.is_dropped() => {}
                TokenKind::Use => {
                    i = self.handle_use(tokens, i, &mut fragment, &namespace, collection);
                    continue;
                }
                TokenKind::Namespace => {
                    i = self.handle_namespace(tokens, i, &mut namespace, collection);
                    continue;
                }
                TokenKind::Require => {
                    i = self.handle_include(tokens, i, path, &mut fragment, &namespace, collection, depth);
                    continue;
                }
                // Whitespace, lazy includes and everything else pass
                // through byte for byte.
                _ => fragment.push_str(token.text),
            }
            i += 1;
        }
        collection
            .bucket_mut(&namespace)
            .append_file(&path.display().to_string(), &fragment);
    }

    /// Scan the tokens trailing a statement keyword at `start` until one of
    /// `terminators`, resolving compile-time constant references by literal
    /// substitution. Whitespace and punctuation contribute nothing to the
    /// payload except the namespace separator `\`.
    fn scan_statement(
        &self,
        tokens: &[LexToken<'_>],
        start: usize,
        terminators: &[char],
    ) -> StatementScan {
        let mut resolved = String::new();
        let mut raw = tokens[start].text.to_owned();
        let mut j = start + 1;
        let mut terminator = None;
        while j < tokens.len() {
            let token = tokens[j];
            raw.push_str(token.text);
            if token.kind == TokenKind::Punct {
                let c = token.text.chars().next().unwrap_or('\0');
                if terminators.contains(&c) {
                    terminator = Some(c);
                    j += 1;
                    break;
                }
                if c == '\\' {
                    resolved.push('\\');
                }
                j += 1;
                continue;
            }
            if token.kind != TokenKind::Whitespace && !token.is_dropped() {
                match self.constants.get(token.text) {
                    Some(value) => resolved.push_str(value),
                    None => resolved.push_str(token.text),
                }
            }
            j += 1;
        }
        StatementScan {
            resolved,
            raw,
            next: j,
            terminator,
        }
    }

    /// Import alias: captured into the namespace bucket's deduplicated
    /// alias set and elided from output. A function-local `use (` capture
    /// list is ordinary code and stays.
    fn handle_use(
        &mut self,
        tokens: &[LexToken<'_>],
        i: usize,
        fragment: &mut String,
        namespace: &str,
        collection: &mut CodeCollection,
    ) -> usize {
        let scan = self.scan_statement(tokens, i, &[';', '(']);
        if scan.terminator == Some('(') {
            fragment.push_str(" use ");
            // Re-scan from the argument-list opener as plain code.
            return scan.next - 1;
        }
        if !scan.resolved.is_empty() {
            collection.bucket_mut(namespace).add_use(&scan.resolved);
        }
        scan.next
    }

    /// Namespace switch: no output text; switches the active namespace
    /// (case-normalized), creating its bucket on first use.
    fn handle_namespace(
        &mut self,
        tokens: &[LexToken<'_>],
        i: usize,
        namespace: &mut String,
        collection: &mut CodeCollection,
    ) -> usize {
        let scan = self.scan_statement(tokens, i, &[';', '{', ')']);
        let resolved = scan.resolved.to_lowercase();
        if resolved != *namespace {
            debug!("switching namespace '{namespace}' -> '{resolved}'");
            *namespace = resolved;
            collection.bucket_mut(namespace);
        }
        scan.next
    }

    /// Eager inclusion: resolve the target textually and descend into it
    /// with the current namespace carried forward. Unresolvable targets
    /// keep the literal statement text (fail-open) and record an error.
    #[allow(clippy::too_many_arguments)]
    fn handle_include(
        &mut self,
        tokens: &[LexToken<'_>],
        i: usize,
        current: &Path,
        fragment: &mut String,
        namespace: &str,
        collection: &mut CodeCollection,
        depth: usize,
    ) -> usize {
        let scan = self.scan_statement(tokens, i, &[';']);
        let target = scan.resolved.replace(['\'', '"'], "");
        if target.len() > 1 {
            let mut resolved = PathBuf::from(&target);
            if !resolved.exists() {
                if let Some(dir) = current.parent() {
                    resolved = dir.join(&target);
                }
            }
            if resolved.is_file() {
                self.merge_at(&resolved, namespace, collection, depth + 1);
                return scan.next;
            }
        }
        warn!(
            "unresolvable include '{target}' in {}, keeping statement verbatim",
            current.display()
        );
        self.errors
            .push(BundleError::FileNotFound(PathBuf::from(target)));
        fragment.push_str(&scan.raw);
        scan.next
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::collection::NS_GLOBAL;

    use super::*;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("write fixture");
        path
    }

    fn merge_one(dir: &TempDir, name: &str, content: &str) -> (CodeCollection, Merger) {
        let path = write(dir, name, content);
        let mut merger = Merger::new(&Config::default());
        let mut collection = CodeCollection::new();
        merger.merge(&path, NS_GLOBAL, &mut collection);
        (collection, merger)
    }

    fn global_code(collection: &CodeCollection) -> String {
        collection
            .bucket(NS_GLOBAL)
            .expect("global bucket")
            .files()
            .map(|(_, code)| code)
            .collect()
    }

    #[test]
    fn shared_file_is_merged_exactly_once() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "shared.php", "<?php $shared = 'once';");
        write(&dir, "a.php", "<?php require 'shared.php'; $a = 1;");
        write(&dir, "b.php", "<?php require_once 'shared.php'; $b = 2;");
        let main = write(&dir, "main.php", "<?php require 'a.php'; require 'b.php';");

        let mut merger = Merger::new(&Config::default());
        let mut collection = CodeCollection::new();
        merger.merge(&main, NS_GLOBAL, &mut collection);

        let code = global_code(&collection);
        assert_eq!(code.matches("$shared = 'once';").count(), 1);
        assert!(code.contains("$a = 1;"));
        assert!(code.contains("$b = 2;"));
        assert!(merger.errors().is_empty());
    }

    #[test]
    fn include_cycles_terminate() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "x.php", "<?php require 'y.php'; $x = 1;");
        let y = write(&dir, "y.php", "<?php require 'x.php'; $y = 2;");

        let (collection, merger) = {
            let mut merger = Merger::new(&Config::default());
            let mut collection = CodeCollection::new();
            merger.merge(&y, NS_GLOBAL, &mut collection);
            (collection, merger)
        };
        let code = global_code(&collection);
        assert_eq!(code.matches("$x = 1;").count(), 1);
        assert_eq!(code.matches("$y = 2;").count(), 1);
        assert!(merger.errors().is_empty());
    }

    #[test]
    fn comments_are_dropped_entirely() {
        let dir = TempDir::new().expect("tempdir");
        let (collection, _) = merge_one(
            &dir,
            "c.php",
            "<?php /** doc */ $a = 1; // trailing\n/* block */ $b = 2;",
        );
        let code = global_code(&collection);
        assert!(!code.contains("doc"));
        assert!(!code.contains("trailing"));
        assert!(!code.contains("block"));
        assert!(code.contains("$a = 1;"));
        assert!(code.contains("$b = 2;"));
    }

    #[test]
    fn aliases_are_captured_and_elided() {
        let dir = TempDir::new().expect("tempdir");
        let (collection, _) = merge_one(
            &dir,
            "u.php",
            "<?php\nuse samson\\core\\File;\nuse \\Samson\\Core\\FILE;\n$x = 1;",
        );
        let bucket = collection.bucket(NS_GLOBAL).expect("global");
        assert_eq!(
            bucket.uses().collect::<Vec<_>>(),
            vec!["\\samson\\core\\file"]
        );
        let code = global_code(&collection);
        assert!(!code.contains("use samson"));
        assert!(code.contains("$x = 1;"));
    }

    #[test]
    fn function_local_use_stays_in_code() {
        let dir = TempDir::new().expect("tempdir");
        let (collection, _) = merge_one(
            &dir,
            "closure.php",
            "<?php $f = function() use (&$captured) { return $captured; };",
        );
        let code = global_code(&collection);
        assert!(code.contains(" use (&$captured)"));
        let bucket = collection.bucket(NS_GLOBAL).expect("global");
        assert_eq!(bucket.uses().count(), 0);
    }

    #[test]
    fn namespace_switch_moves_following_code() {
        let dir = TempDir::new().expect("tempdir");
        let (collection, _) = merge_one(
            &dir,
            "ns.php",
            "<?php\nnamespace Samson\\App;\nclass Thing {}\n",
        );
        let bucket = collection.bucket("samson\\app").expect("bucket created");
        let code: String = bucket.files().map(|(_, c)| c).collect();
        assert!(code.contains("class Thing {}"));
        assert!(!code.contains("namespace"));
    }

    #[test]
    fn included_file_inherits_current_namespace() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "inner.php", "<?php $inner = true;");
        let outer = write(
            &dir,
            "outer.php",
            "<?php namespace app; require 'inner.php'; $outer = true;",
        );
        let mut merger = Merger::new(&Config::default());
        let mut collection = CodeCollection::new();
        merger.merge(&outer, NS_GLOBAL, &mut collection);

        let bucket = collection.bucket("app").expect("app bucket");
        let code: String = bucket.files().map(|(_, c)| c).collect();
        assert!(code.contains("$inner = true;"));
        assert!(code.contains("$outer = true;"));
    }

    #[test]
    fn unresolvable_include_is_kept_verbatim_and_reported() {
        let dir = TempDir::new().expect("tempdir");
        let (collection, merger) = merge_one(
            &dir,
            "missing.php",
            "<?php require 'no/such/file.php'; $after = 1;",
        );
        let code = global_code(&collection);
        assert!(code.contains("require 'no/such/file.php';"));
        assert!(code.contains("$after = 1;"));
        assert!(
            merger
                .errors()
                .iter()
                .any(|e| matches!(e, BundleError::FileNotFound(_)))
        );
    }

    #[test]
    fn constants_substitute_into_include_paths() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "lib.php", "<?php $lib = 'loaded';");
        let main = write(&dir, "main.php", "<?php require LIB_FILE;");

        let mut config = Config::default();
        config
            .constants
            .insert("LIB_FILE".to_owned(), "'lib.php'".to_owned());
        let mut merger = Merger::new(&config);
        let mut collection = CodeCollection::new();
        merger.merge(&main, NS_GLOBAL, &mut collection);

        assert!(global_code(&collection).contains("$lib = 'loaded';"));
        assert!(merger.errors().is_empty());
    }

    #[test]
    fn strip_markers_remove_multiline_blocks() {
        let dir = TempDir::new().expect("tempdir");
        let (collection, _) = merge_one(
            &dir,
            "dev.php",
            "<?php $keep = 1;\n//[PHPCOMPRESSOR(remove,start)]\n$dev = 'gone';\nif (true) { debug(); }\n//[PHPCOMPRESSOR(remove,end)]\n$also = 2;",
        );
        let code = global_code(&collection);
        assert!(code.contains("$keep = 1;"));
        assert!(code.contains("$also = 2;"));
        assert!(!code.contains("$dev"));
        assert!(!code.contains("debug()"));
    }

    #[test]
    fn missing_entry_file_is_nonfatal() {
        let dir = TempDir::new().expect("tempdir");
        let mut merger = Merger::new(&Config::default());
        let mut collection = CodeCollection::new();
        merger.merge(&dir.path().join("ghost.php"), NS_GLOBAL, &mut collection);
        assert_eq!(merger.errors().len(), 1);
    }

    #[test]
    fn lex_failure_skips_only_that_file() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "broken.php", "<?php $s = 'unterminated");
        let main = write(
            &dir,
            "main.php",
            "<?php require 'broken.php'; $fine = 1;",
        );
        let mut merger = Merger::new(&Config::default());
        let mut collection = CodeCollection::new();
        merger.merge(&main, NS_GLOBAL, &mut collection);

        assert!(global_code(&collection).contains("$fine = 1;"));
        assert!(
            merger
                .errors()
                .iter()
                .any(|e| matches!(e, BundleError::Lex { .. }))
        );
    }
}
