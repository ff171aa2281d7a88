//! # Repositories
//!
//! SQLite access for the cached entity tables.
//!
//! - [`PaginatedEntityRepository`] - generic over [`EntityTable`], one per
//!   entity kind (`audios`, `artists`, `albums`)
//! - [`Page`] / [`PageRequest`] - windowed reads for the paged view

pub mod entity;
pub mod pagination;

pub use entity::{EntityTable, PaginatedEntityRepository, MAX_BOUND_IDS};
pub use pagination::{Page, PageRequest};
