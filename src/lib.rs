#![forbid(unsafe_code)]

//! Landing orchestration engine keeping two independently-versioned source
//! trees consistent: it works out which upstream changes have not yet been
//! mirrored, replays them downstream as provenance-tagged commits, gates
//! each batch behind a CI validation loop, and advances the persisted sync
//! checkpoint once a batch is confirmed merged.

pub mod config;
pub mod error;
pub mod landable;
pub mod landing;
pub mod metadata;
pub mod record;
pub mod replicate;
pub mod repo;
pub mod services;
pub mod syncpoint;
pub mod telemetry;
pub mod trypush;
pub mod unlanded;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the driver surface at the crate root for convenience
pub use crate::config::Config;
pub use crate::landing::{LandingOpts, LandingSync, try_push_complete, update_landing};
pub use crate::record::{
    CommitRange, MutToken, ProcessName, SyncRecord, SyncRecordStore, SyncStatus, SyncType, TryPush,
};
pub use crate::repo::SyncRepos;
pub use crate::services::Services;
pub use crate::trypush::{TryPushResult, try_result};
