//! Recoverable, resumable append-style writes on compose-capable object stores

pub mod blob;
pub mod buggify;
pub mod config;
pub mod credentials;
pub mod error;
pub mod filesystem;
pub mod io;
pub mod storage;
pub mod writer;

pub use blob::{BlobIdentifier, BlobNaming};
pub use config::{RetryOptions, WriterOptions};
pub use credentials::{AccessToken, CredentialProvider, StaticCredentialProvider};
pub use error::{WriterError, WriterResult};
pub use filesystem::{BlobFileSystem, BlobFileSystemPlugin, CommittingOutputStream};
pub use storage::{
    BlobStorage, InMemoryBlobStorage, LocalFsBlobStorage, RetryingBlobStorage, SimulatedBlobStorage,
    SimulatedStorageConfig, COMPOSE_MAX_BLOBS,
};
#[cfg(feature = "cloud")]
pub use storage::CloudBlobStorage;
pub use writer::{
    CommitState, CommitStateSerializer, CommitStep, Committer, RecoverableOutputStream,
    RecoverableWriter, ResumeState, ResumeStateSerializer, StateSerializer,
};
