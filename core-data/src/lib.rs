//! # Core Data Module
//!
//! Offline-first data layer for search results and entity details.
//!
//! ## Overview
//!
//! Remote API responses are cached in SQLite and served back under staleness
//! rules:
//! - [`Store`](store::Store) - generic cache-aside store with fetch coalescing
//! - [`LastRequests`](last_requests::LastRequests) - per-key staleness ledger
//! - [`SearchPager`](paging::SearchPager) - page-advance and refresh over a search store
//! - [`DatmusicApi`](remote::DatmusicApi) - remote endpoints behind the `HttpClient` bridge
//!
//! ## Storage
//!
//! Entities are partitioned by the fingerprint of the query that produced
//! them, so the same audio can live under several searches and pages. Detail
//! lookups (artist, album) write rows keyed by the business id instead.

pub mod db;
pub mod error;
pub mod invalidation;
pub mod last_requests;
pub mod models;
pub mod paging;
pub mod params;
pub mod remote;
pub mod repositories;
pub mod store;

pub use error::{DataError, Result};
pub use invalidation::InvalidationTracker;
pub use last_requests::LastRequests;
pub use models::{Album, AlbumPhoto, Artist, ArtistPhoto, Audio, PaginatedEntity};
pub use paging::{LoadType, MediatorResult, SearchPager};
pub use params::{AlbumParams, ArtistParams, BackendType, CaptchaSolution, SearchParams, StoreKey};
pub use remote::DatmusicApi;
pub use repositories::{Page, PageRequest, PaginatedEntityRepository};
pub use store::{DataContext, ResponseOrigin, Store, StoreResponse, Stores};
