// src/lib.rs

//! Larder
//!
//! A thread-safe, rebuild-on-demand cache for parsed software catalog
//! metadata.
//!
//! The cached [`Catalog`] is shared read-only by any number of threads,
//! while external events (a file changing on disk, a repository refresh)
//! mark it stale through [`CatalogCache::invalidate`]. Rebuilding only
//! starts once every reader has finished, and a catalog invalidated while
//! it is being rebuilt is rebuilt again before anyone sees it.
//!
//! # Example
//!
//! ```
//! use larder::{Catalog, CatalogCache};
//!
//! let cache = CatalogCache::new(|_cache, _interactive, _cancel| {
//!     // A real callback would load the catalog from disk and register
//!     // watches for the files it read.
//!     Ok(Catalog::default())
//! });
//!
//! let guard = cache.acquire(false, None)?;
//! assert!(guard.catalog().components.is_empty());
//! # Ok::<(), larder::Error>(())
//! ```

pub mod cache;
pub mod cancel;
pub mod catalog;
mod error;

pub use cache::{BuildFn, CatalogCache, CatalogGuard, WatchHandle};
pub use cancel::CancelToken;
pub use catalog::{Catalog, Component, ComponentKind, Scope};
pub use error::{Error, Result};
