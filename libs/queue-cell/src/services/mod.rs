pub mod admission;
pub mod counter;
pub mod entries;

pub use admission::QueueAdmissionService;
pub use counter::{InMemoryTokenCounter, RedisTokenCounter, SupabaseTokenCounter, TokenCounterStore};
pub use entries::{AtomicAdmissionStore, InMemoryQueueStore, QueueEntryStore, SupabaseQueueStore};
