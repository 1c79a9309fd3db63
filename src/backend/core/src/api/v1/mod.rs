//! V1 API module.
//!
//! This module contains the stable V1 API endpoints for:
//! - Generation task submission, polling and eviction
//! - Health and system statistics

pub mod routes;

pub use routes::{v1_router, V1_PREFIX};
