//! Account Prober service
//!
//! HTTP dashboard, run trigger and result endpoints over `prober-core`,
//! plus the wiring that assembles the engine from a `ProberConfig`.

pub mod app;
pub mod handler;

pub use app::{BackgroundTasks, ProberApp};
pub use handler::{create_router, ApiError, AppState};
