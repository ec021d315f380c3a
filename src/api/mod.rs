//! HTTP API module.
//!
//! Thin axum layer over the session registry, job runner and stream publisher.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
