//! Document-store plumbing shared by the profile server and the admin CLI.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod store;

pub use bootstrap::{BootstrapOutcome, BootstrapService};
pub use config::StoreConfig;
pub use db::SledStore;
pub use store::{Collection, DocumentStore, Keyspace, StoreError};
