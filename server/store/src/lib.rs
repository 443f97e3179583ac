pub mod errors;
pub mod ids;
pub mod index;
pub mod memory;
pub mod model;
pub mod repo;

pub use errors::{StoreError, StoreResult};
pub use ids::{ItemId, OutboxId};
pub use index::{IndexStore, MemoryIndexStore, PgIndexStore};
pub use memory::MemoryItemsRepo;
pub use model::{
    AuctionItem, ItemDocument, ItemEvent, ItemEventKind, NewAuctionItem, OutboxCounts,
    OutboxRecord, OutboxStatus,
};
pub use repo::{ItemsRepo, PgItemsRepo};
