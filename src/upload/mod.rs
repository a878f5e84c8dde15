//! Upload of stored observations over the cellular data bearer

pub mod protocol;
pub mod uploader;

pub use uploader::{uploader_worker, UploadClient, Uploader};
