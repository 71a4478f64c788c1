mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::ExperimentStore;
