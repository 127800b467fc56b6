//! The transfer pipeline: progress accounting, concurrency limits, and the
//! partitioned upload and download of documents.

pub mod downloader;
pub mod limiter;
pub mod progress;
pub mod uploader;

pub use downloader::PartitionedDownloader;
pub use limiter::ConcurrencyLimiter;
pub use progress::{Progress, ProgressRegister};
pub use uploader::{PartitionedUploader, UploaderOptions};
