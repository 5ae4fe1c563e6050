//! # usrd Shared Library
//!
//! Entity management core for the usrd user-identity record service: the
//! user model, the Record Store boundary and its adapters, credential
//! hashing, and the `UserService` façade consumed by the API server.
//!
//! ## Module Organization
//!
//! - `models`: user record, inputs and outward representation
//! - `users`: entity management API, partial-update engine, uniqueness guard, id allocation
//! - `store`: Record Store trait with in-memory and PostgreSQL adapters
//! - `auth`: credential hashing
//! - `db`: connection pool and migrations
//! - `error`: error types

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod users;

/// Current version of the usrd shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
