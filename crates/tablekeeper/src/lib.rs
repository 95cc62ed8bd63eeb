#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::large_enum_variant,
    clippy::missing_errors_doc
)]
#![forbid(unsafe_code)]

pub mod catalog;
mod config;
pub mod error;
pub mod identifier;
pub mod spec;
pub mod table;
pub mod transaction;
pub mod update;

pub use catalog::{Catalog, MemoryCatalog, TableCommit, TableCreation, load_catalog};
#[cfg(feature = "sqlx-sqlite")]
pub use catalog::SqlCatalog;
pub use config::{
    CONFIG, CacheConfig, DEFAULT_WAREHOUSE_LOCATION, DynAppConfig, MetadataCacheConfig,
};
pub use identifier::{NamespaceIdent, TableIdent};
pub use table::Table;
pub use transaction::Transaction;

pub use tablekeeper_io as io;

#[cfg(test)]
mod tests;
