//! Content-addressed blob storage over interchangeable backends.
//!
//! A [`StorageRouter`] holds an ordered list of [`Backend`]s built from
//! JSON descriptors by a [`FactoryRegistry`]. Reads stop at the first
//! backend holding the blob, writes fan out to every writable one.

pub mod backend;
pub mod backends;
pub mod blob;
pub mod config;
pub mod error;
pub mod factory;
pub mod hash;
pub mod params;
pub mod router;
pub mod stream;
pub mod usage;

pub use backend::{Backend, BackendPolicy};
pub use blob::{BlobRecord, BlobState};
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use factory::{BackendDescriptor, BackendFactory, FactoryRegistry, Provisioned};
pub use hash::ContentHash;
pub use params::Parameters;
pub use router::StorageRouter;
pub use stream::BlobStream;
pub use usage::StorageUsage;
