//! Anti-forgery tokens
//!
//! [`CsrfManager`] issues opaque, time-bounded tokens and validates them on
//! state-changing requests. Tokens live in a [`TokenStore`]: in memory for a
//! single instance, in Redis when several instances share traffic.

pub mod manager;
pub mod redis_store;
pub mod store;
pub mod token;

pub use manager::{CsrfManager, CsrfSettings, CsrfStats};
pub use redis_store::RedisTokenStore;
pub use store::{Admission, MemoryTokenStore, TokenStore};
pub use token::{generate_token_value, IssuedToken, TokenRecord, Validation};
