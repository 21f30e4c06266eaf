//! credsync API
//!
//! HTTP surface of the external credential sync pipeline: provider webhook
//! ingress, the operator admin surface, and the wiring that runs the worker
//! pool, webhook intake consumer and scheduler alongside the server.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod router;
pub mod state;
pub mod subscribe;

pub use bootstrap::{build_pipeline, BackgroundTasks, Pipeline, PipelineSettings};
pub use config::{Config, ConfigError, KmsConfig};
pub use error::{ApiError, ApiResult};
pub use router::app_router;
pub use state::AppState;
