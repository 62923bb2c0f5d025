//! The per-user conversation object (continuum), its persistence, the
//! turn-scoped unit of work, and the cold-start session cache loader.

pub mod continuum;
pub mod loader;
pub mod repository;
pub mod uow;

pub use continuum::{
    Continuum, ContinuumMetadata, ContinuumSnapshot, MessageMetadata, SegmentStatus, StoredMessage,
};
pub use loader::SessionCacheLoader;
pub use repository::ContinuumRepository;
pub use uow::UnitOfWork;
