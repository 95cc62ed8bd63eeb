#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![forbid(unsafe_code)]

mod error;
#[cfg(feature = "storage-local")]
mod local;
mod location;
#[cfg(feature = "storage-in-memory")]
mod memory;
mod storage;

pub use error::{ErrorKind, IOError, InvalidLocationError};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use location::Location;
#[cfg(feature = "storage-in-memory")]
pub use memory::InMemoryStorage;
pub use storage::{Storage, StorageBackend, WritePrecondition};
