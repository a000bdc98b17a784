pub mod classification_queue;
pub mod dedup_store;
pub mod postgres_queue;
pub mod postgres_ticket_store;
pub mod service;
pub mod ticket;
pub mod ticket_store;

pub use classification_queue::{
    ClassificationJob, ClassificationQueue, JobMode, MemoryClassificationQueue, QueueError,
};
pub use dedup_store::{DedupClaimStore, DedupStoreError, MemoryDedupStore, PostgresDedupStore};
pub use postgres_queue::PostgresClassificationQueue;
pub use postgres_ticket_store::PostgresTicketStore;
pub use ticket_store::{MemoryTicketStore, TicketStore, TicketStoreError};
