//! Keeps per-branch timetable collections in a document store in step with
//! the iCalendar feeds of their groups.

pub mod classifier;
pub mod config;
pub mod custom;
pub mod download;
pub mod error;
pub mod extractor;
pub mod inspect;
pub mod merge;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod sweep;

pub use config::Params;
pub use error::{UpdaterError, UpdaterResult};
pub use pipeline::Updater;
pub use scheduler::Scheduler;
