//! Storage backends for role assignments, documents and revisions.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;
