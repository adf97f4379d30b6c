//! Postgres adapters for the store ports.

mod events;
mod organizations;
mod repositories;
mod users;

pub use events::PostgresEventStore;
pub use organizations::PostgresOrgStore;
pub use repositories::PostgresRepoStore;
pub use users::PostgresUserStore;
