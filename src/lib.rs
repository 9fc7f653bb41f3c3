//! Shuppan - manga chapter reconciliation and upload core.
//!
//! This library provides functionality for:
//! - Reconciling locally discovered chapters against an authoritative
//!   reference dataset (volume correction, title resolution, group
//!   backfill), with every change carrying a reason
//! - Detecting already-published duplicate chapters
//! - Uploading chapters through a chained fixed-window rate limiter with
//!   classified failure handling
//!
//! It is consumed as a library by a UI layer; there is no CLI surface.

pub mod api;
pub mod changes;
pub mod config;
pub mod dump;
pub mod error;
pub mod groups;
pub mod rate_limit;
pub mod upload;
pub mod utils;

// Re-export commonly used types
pub use api::{CatalogClient, ChapterAggregate, resolve_series_catalog};
pub use changes::{
    ChangeEngine, ChangeOptions, ChangeStatus, ChapterChangeResult, ChapterChanges, ChapterInput,
    MatchInfo, NO_GROUP_ID, Warning, WarningReason, default_no_group_predicate, detect_duplicates,
};
pub use config::Config;
pub use dump::{DumpEntry, DumpIndex, DumpResolver, DumpSource, Group, HttpDumpSource};
pub use error::{ConfigError, DumpError, TransportError};
pub use groups::{RemoteGroup, map_groups_to_remote_ids, match_groups_by_path};
pub use rate_limit::{ChainedRequest, RateLimitBucket};
pub use upload::{
    ChapterDraft, JobStatus, PageUpload, RunOutcome, RunState, UploadJob, UploadOptions,
    UploadTransport, Uploader,
};
