//! # API Module
//!
//! HTTP interface for the CSRF manager and the performance monitor.
//!
//! ## Endpoints
//!
//! - `GET /api/csrf-token` - Issue a token (never cached)
//! - `GET /api/csrf-debug` - Token store diagnostics
//! - `DELETE /api/csrf-debug` - Remove every token
//! - `GET /api/performance` - Report as JSON (`?operation=` for one) or `?format=prometheus`
//! - `POST /api/performance` - `{"action": "reset"}`
//! - `GET /health` - Liveness
//! - `GET /info` - Build and backend info
//!
//! Every `POST`, `PUT`, `PATCH` and `DELETE` must carry a valid token in
//! `X-CSRF-Token` unless its path is listed in `csrf.exempt_paths`.

pub mod handlers;
pub mod middleware;
pub mod server;

// Re-export commonly used items
pub use handlers::{ApiResponse, ErrorResponse};
pub use server::{create_router, start_api_server};
