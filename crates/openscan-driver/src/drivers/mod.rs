//! Scanner driver implementations.

pub mod escl;
pub mod folder;
pub mod ftp;
pub mod wsd;

pub use escl::EsclDriver;
pub use folder::{DetectedFile, FolderWatchDriver};
pub use ftp::FtpReceiver;
pub use wsd::WsdDriver;
