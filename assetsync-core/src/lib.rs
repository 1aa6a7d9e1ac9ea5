pub mod audit;
pub mod bsdiff;
pub mod bspatch;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod path_safety;
pub mod planner;
pub mod platform;
pub mod progress;
pub mod publish;
pub mod source;
pub mod sync;

pub use error::{Checkpoint, SyncError, SyncResult};
pub use manifest::Manifest;
pub use sync::{SyncOptions, SyncOutcome, SyncReport, Syncer};
