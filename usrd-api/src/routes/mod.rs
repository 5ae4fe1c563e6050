/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `users`: User record management under `/system/users`

pub mod health;
pub mod users;
