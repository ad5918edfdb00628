//! Storage backends for job sources and conversion outputs.
//!
//! Every backend implements [`StorageBackend`]. The worker picks a download
//! backend from the job's declared source type and a single upload backend
//! from configuration, both through [`factory`].

pub mod azure;
pub mod backend;
pub mod error;
pub mod factory;
pub mod http;
pub mod local;
pub mod s3;

pub use azure::{AzureBlobSettings, AzureBlobStorage};
pub use backend::{StorageBackend, UploadItem};
pub use error::{StorageError, StorageResult};
pub use factory::{output_backend, source_backend, StorageKind, StorageSettings};
pub use http::HttpStorage;
pub use local::LocalStorage;
pub use s3::{parse_s3_uri, S3Settings, S3Storage};
