//! PushLog Release Tracker: correlates release webhooks into live records.
//!
//! A GitHub tag push opens a release record, a CircleCI build completion claims
//! it by build number, and a Docker Hub push is matched to it by push minute.
//! No webhook carries a key shared by all three sources; the record's identity
//! migrates from (tag, commit) to build number as the pipeline advances.
//!
//! In-memory only: records live until the process exits.

pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod format;
pub mod handlers;
pub mod identity;
pub mod matcher;
pub mod normalize;
pub mod notify;
pub mod state;
pub mod store;
pub mod types;

pub use config::{Cli, Config};
pub use engine::{Admission, Engine, Outcome};
pub use error::EngineError;
pub use handlers::router;
pub use state::AppState;
pub use store::{RecordId, ReleaseView};
pub use types::{ReleaseRecord, Stage};
