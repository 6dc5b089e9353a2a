//! Concrete source/destination implementations against the `backend`
//! contract: local filesystem, Google Drive, OneDrive, OneDrive Share
//! (read-only), and arbitrary HTTP URLs (read-only).

pub mod backend;
pub mod client_pool;
pub mod drive;
pub mod filesystem;
pub mod http;
pub mod onedrive;
pub mod onedrive_share;
pub mod path_index;
pub mod resumable_upload;
pub mod token;

pub use backend::{failed_worker, DestinationBackend, SourceBackend, TaskStream, Worker};
pub use client_pool::{ClientPool, SleepAware, SleepState};
pub use path_index::PathIndex;
pub use token::{RefreshTokenBackend, ServiceAccountBackend, ServiceAccountKey, TokenBackend, TokenState};
