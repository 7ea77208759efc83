//! PostgreSQL driver, introspection, version store and script executor.

pub mod db;
pub mod driver;
pub mod introspect;
pub mod store;

pub use db::{connect, PgExecutor};
pub use driver::PostgresDriver;
pub use introspect::PgLoader;
pub use store::PgVersionStore;
