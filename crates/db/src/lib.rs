pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_settings, DbPool};
pub use repositories::{
    open_lead_store, CreateOutcome, InMemoryLeadStore, LeadStore, RepositoryError, SqlLeadStore,
    StorageHealth, StorageMode, TableCheck,
};
