pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod models;
pub mod store;

pub use dedup::{Mode, Resolver, normalize_code, plan};
pub use error::{CleanupError, ConfigError, StoreError};
pub use models::{CleanupReport, Slot};
pub use store::{MemoryStore, SlotStore};
