//! Client-side engine for timed exam attempts: answer capture, countdown, autosave to a
//! durable store, recovery after a reload and single-flight submission.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{EngineConfig, EngineSettings};
pub use error::{LedgerError, RemoteError, SessionError, StoreError};
pub use services::{
    DurableStore, Entry, ExamSession, HttpRemoteAuthority, RemoteAuthority, SessionEntry,
    SubmitResult,
};
