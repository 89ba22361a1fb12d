//! RepoVitals State Store
//!
//! Durable per-repository state (counters, velocities, scores and HTTP cache
//! validators) behind the [`StateStore`] contract, with a SQLite backend and
//! an in-memory backend.

mod memory;
mod models;
mod queries;
mod schema;
mod store;

pub use memory::InMemoryStore;
pub use models::*;
pub use schema::Database;
pub use store::StateStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
