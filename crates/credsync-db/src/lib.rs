//! credsync db
//!
//! Storage for the external credential sync pipeline.
//!
//! [`PgStore`] implements every store contract from `credsync-core` over one
//! Postgres pool. [`InMemoryStore`] implements the same contracts in process,
//! for tests and for running the service without a database.

pub mod error;
pub mod memory;
pub mod migrations;
pub mod pg;

pub use error::DbError;
pub use memory::{InMemoryStore, LearnerRecord};
pub use migrations::run_migrations;
pub use pg::PgStore;

pub use sqlx::PgPool;
