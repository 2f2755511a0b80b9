//! phpack — PHP source bundler
//!
//! Folds a multi-file, multi-namespace PHP web application into a single
//! deployable `index.php`: inlines every file reachable through eager
//! inclusion statements, merges code per namespace with deduplicated
//! `use` aliases, strips comments and development-only blocks, reorders
//! merged files so type declarations satisfy load order, and embeds a
//! patched serialized snapshot of the application state.

pub mod assemble;
pub mod collection;
pub mod config;
pub mod error;
pub mod lexer;
pub mod merge;
pub mod order;
pub mod orchestrator;
pub mod snapshot;

pub use collection::{CodeCollection, NS_GLOBAL, NamespaceBucket, VIEWS};
pub use config::Config;
pub use error::BundleError;
pub use merge::Merger;
pub use orchestrator::{BundleManifest, Bundler, ModuleSources};
