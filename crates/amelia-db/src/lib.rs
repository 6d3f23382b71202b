//! Durable storage for Amelia: the application database (workflows, events,
//! token usage) and the checkpoint store, both reachable through a single
//! `sqlx::PgPool`.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::DbConfig;
