//! Run execution engine for installed apps.
//!
//! Given a user's installed app, the engine resolves its connector grants,
//! fetches data from connected accounts (Google Drive, Gmail), renders the
//! app's prompt template, invokes a generative model with a structured
//! output contract, validates the result, and persists the run lifecycle
//! plus its artifact. Progress is reported to an optional observer callback
//! at each stage transition.

pub mod core;
pub mod logging;

pub use crate::core::engine::{
    Authorizer, EngineConfig, EngineError, NoAdmins, RunEngine, RunMetadata, RunRequest,
    RunResult, StatusCallback, can_transition,
};
pub use crate::core::store::{RecordStore, RunStatus};
