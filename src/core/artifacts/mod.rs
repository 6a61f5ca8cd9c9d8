//! Event artifacts: the saved snapshot and its optional upload.

pub use self::{
    error::{SnapshotError, UploadError},
    snapshot::{Snapshot, SnapshotStore},
    upload::{HttpUploader, Uploader},
};

pub mod error;
pub mod snapshot;
pub mod upload;
