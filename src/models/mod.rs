//! Domain models for marketplace-sync

pub mod account;
pub mod conflict;
pub mod offer;
pub mod order;
pub mod product;
pub mod request_log;
pub mod sync_log;

pub use account::AccountType;
pub use conflict::{ConflictStatus, EntityKind, ImportConflict};
pub use offer::{OfferRecord, RemoteOffer};
pub use order::{OrderRecord, OrderStatus, RemoteOrder};
pub use product::{ProductRecord, RemoteProduct};
pub use request_log::RequestLogEntry;
pub use sync_log::{
    AccountScope, SyncErrorEntry, SyncLog, SyncProgress, SyncRunStatus, SyncStatus, SyncType,
};
