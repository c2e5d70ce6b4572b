//! stacksink-storage — `IngestStore` backends.
//!
//! Two implementations of the store contract from `stacksink-core`:
//! - [`MemoryStore`]: RAM tables behind a mutex. The test double and the
//!   scratch target for raw-event replay dry runs. Mirrors the Postgres
//!   semantics, including canonicality flips and the commit counter.
//! - [`PgStore`]: PostgreSQL via `sqlx`, for production deployments.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A block with no parent microblock carries the all-zero hash sentinel;
/// only a real hash confirms part of the streamed sequence.
pub(crate) fn names_a_microblock(parent_microblock_hash: &str) -> bool {
    parent_microblock_hash
        .trim_start_matches("0x")
        .chars()
        .any(|c| c != '0')
}
