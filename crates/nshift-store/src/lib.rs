pub mod error;
pub mod memory;
pub mod redb_store;
pub mod store;
pub mod ttl;

pub use error::StoreError;
pub use memory::InMemoryHistoryStore;
pub use redb_store::RedbHistoryStore;
pub use store::HistoryStore;
