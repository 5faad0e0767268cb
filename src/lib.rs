//! Shared service plumbing: configuration, structured logging, token
//! authentication middleware and PostgreSQL bootstrapping with
//! read/write routing.

// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod telemetry;

// Authentication and persistence
pub mod auth;
pub mod database;

// Application layer
pub mod seed;
pub mod server;

pub use error::{CommonError, Result};
