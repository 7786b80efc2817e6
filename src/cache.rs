// src/cache.rs

//! Thread-safe, rebuild-on-demand catalog cache
//!
//! A parsed [`Catalog`] stays valid only until its underlying source
//! changes, and rebuilding it while readers still hold references is
//! unsafe. [`CatalogCache`] coordinates the two: any number of threads may
//! read the current catalog at the same time, and when the catalog is
//! stale the rebuilding thread first waits for every reader to finish.
//!
//! Create one cache at startup with a [`BuildFn`] callback. Call
//! [`CatalogCache::acquire`] to refresh the catalog if needed and obtain
//! read access through the returned [`CatalogGuard`]; dropping the guard
//! releases the access and can unblock a pending rebuild. On a valid
//! catalog, acquire grants access and returns immediately.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::cancel::{CancelToken, Wake};
use crate::catalog::{Catalog, Component, ComponentKind, Scope};
use crate::error::{Error, Result};

/// Build callback: produces a fresh catalog from its underlying source.
///
/// Invoked by [`CatalogCache::acquire`] whenever the cached catalog is
/// missing or stale. The callback receives the cache itself and may call
/// [`CatalogCache::invalidate`] and [`CatalogCache::add_watch`] on it, but
/// must not call [`CatalogCache::acquire`], which would deadlock. It runs
/// again within the same acquire if the source changed while it ran, so it
/// must be safe to invoke repeatedly.
///
/// The `interactive` flag forwards the acquirer's scheduling hint. The
/// token, when present, is the acquirer's cancellation token.
pub type BuildFn =
    dyn Fn(&CatalogCache, bool, Option<&CancelToken>) -> anyhow::Result<Catalog> + Send + Sync;

/// Keeps an external invalidation source alive.
///
/// A build callback that subscribes to change notifications (a file watch,
/// a bus signal) hands the subscription's owning handle to
/// [`CatalogCache::add_watch`]. The cache holds the handle until the next
/// rebuild attempt starts, then drops it, so each build's subscriptions
/// replace the previous build's.
pub trait WatchHandle: Send {}

impl<T: Send> WatchHandle for T {}

/// A built catalog plus the metadata derived from it, shared with guards
struct Entry {
    catalog: Catalog,
    by_launchable: HashMap<String, Vec<usize>>,
}

struct State {
    entry: Option<Arc<Entry>>,
    /// Current active readers, those who acquired and did not release yet
    n_acquired: u32,
    building: bool,
    watches: Vec<Box<dyn WatchHandle>>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    /// Bumped on every invalidation: the version of the source the catalog
    /// should eventually reflect. Kept outside the mutex so invalidation
    /// and validity checks never block.
    change_stamp: AtomicU64,
    /// The change_stamp value the current catalog was built against
    built_stamp: AtomicU64,
    /// Lock-free mirror of `state.entry.is_some()`
    has_catalog: AtomicBool,
}

impl Shared {
    fn stamps_match(&self) -> bool {
        self.built_stamp.load(Ordering::SeqCst) == self.change_stamp.load(Ordering::SeqCst)
    }
}

impl Wake for Shared {
    fn wake(&self) {
        // A cancellation must not slip between a waiter's flag check and
        // its sleep; taking the state lock serializes with both.
        let _state = self.state.lock();
        self.cond.notify_all();
    }
}

/// Thread-safe rebuild-on-demand wrapper around a [`Catalog`]
pub struct CatalogCache {
    shared: Arc<Shared>,
    build: Box<BuildFn>,
}

impl CatalogCache {
    /// Create a cache that rebuilds its catalog with `build`.
    ///
    /// The first [`acquire`](Self::acquire) always runs the callback; the
    /// stamps start intentionally mismatched so a fresh cache counts as
    /// stale.
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&CatalogCache, bool, Option<&CancelToken>) -> anyhow::Result<Catalog>
            + Send
            + Sync
            + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entry: None,
                    n_acquired: 0,
                    building: false,
                    watches: Vec::new(),
                }),
                cond: Condvar::new(),
                change_stamp: AtomicU64::new(0),
                built_stamp: AtomicU64::new(1),
                has_catalog: AtomicBool::new(false),
            }),
            build: Box::new(build),
        }
    }

    /// Acquire read access to the catalog, rebuilding it first if needed.
    ///
    /// Returns immediately when the catalog is present and current. When it
    /// is stale and no readers are active, this thread rebuilds it, looping
    /// until the built catalog matches the latest invalidation stamp.
    /// Otherwise the call blocks until a rebuild elsewhere finishes or the
    /// readers drain, whichever lets it make progress.
    ///
    /// `interactive` is forwarded to the build callback as a scheduling
    /// hint. `cancel`, when given, aborts the waiting phase only; a build
    /// running on another thread is never interrupted by it.
    pub fn acquire(
        &self,
        interactive: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<CatalogGuard<'_>> {
        let _waiter =
            cancel.map(|token| token.register(Arc::clone(&self.shared) as Arc<dyn Wake>));

        let mut state = self.shared.state.lock();

        let result = loop {
            match state.entry.as_ref() {
                Some(entry) if self.shared.stamps_match() => break Ok(Arc::clone(entry)),
                _ => {}
            }

            if state.n_acquired == 0 && !state.building {
                break self.rebuild(&mut state, interactive, cancel);
            }

            if cancel.is_some_and(|token| token.is_cancelled()) {
                break Err(Error::Cancelled);
            }

            self.shared.cond.wait(&mut state);
        };

        if result.is_ok() {
            state.n_acquired += 1;
        }

        // More threads can be waiting on a rebuild; wake them all so a
        // queue of readers cannot starve a pending rebuild.
        self.shared.cond.notify_all();
        drop(state);

        result.map(|entry| CatalogGuard {
            cache: self,
            entry,
        })
    }

    /// Rebuild the catalog on the calling thread. The caller holds the
    /// state lock with no active readers and no build in flight.
    fn rebuild(
        &self,
        state: &mut MutexGuard<'_, State>,
        interactive: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<Arc<Entry>> {
        debug_assert!(state.n_acquired == 0 && !state.building);
        state.building = true;

        let result = loop {
            // Drop the previous catalog, its derived metadata and the watch
            // subscriptions before each attempt. Readers are gone, and new
            // acquirers wait on the building flag.
            state.entry = None;
            state.watches.clear();
            self.shared.has_catalog.store(false, Ordering::SeqCst);
            let snapshot = self.shared.change_stamp.load(Ordering::SeqCst);
            self.shared.built_stamp.store(snapshot, Ordering::SeqCst);

            tracing::debug!(stamp = snapshot, interactive, "rebuilding catalog");

            // The callback runs with the state lock released so it can call
            // invalidate() and add_watch() on this cache; the building flag
            // keeps rebuilds mutually exclusive meanwhile.
            let built = MutexGuard::unlocked(state, || (self.build)(self, interactive, cancel));

            match built {
                Ok(catalog) => {
                    let entry = Arc::new(Entry {
                        by_launchable: index_by_launchable(&catalog),
                        catalog,
                    });
                    state.entry = Some(Arc::clone(&entry));
                    self.shared.has_catalog.store(true, Ordering::SeqCst);

                    // The source may have changed again while the callback
                    // ran; rebuild until the stamps agree.
                    if self.shared.stamps_match() {
                        tracing::debug!(
                            components = entry.catalog.components.len(),
                            "catalog rebuilt"
                        );
                        break Ok(entry);
                    }
                    tracing::debug!("catalog changed while rebuilding, trying again");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "catalog rebuild failed");
                    break Err(Error::Build(err));
                }
            }
        };

        state.building = false;
        result
    }

    /// Release one read access. Called by [`CatalogGuard`] on drop.
    pub(crate) fn release(&self) {
        let mut state = self.shared.state.lock();

        assert!(state.n_acquired > 0, "release without a matching acquire");
        state.n_acquired -= 1;

        // Broadcast rather than single-wake: several readers releasing in
        // a row must not starve a thread waiting to rebuild.
        self.shared.cond.notify_all();
    }

    /// Mark the catalog as needing a rebuild on the next acquire.
    ///
    /// Never blocks and never touches the catalog current readers see.
    /// Safe to call from any thread, including from inside the build
    /// callback, in which case the running build is repeated.
    pub fn invalidate(&self) {
        self.shared.change_stamp.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("catalog invalidated");
    }

    /// Whether the catalog is present and current, without blocking.
    ///
    /// A hint only: another thread may invalidate or rebuild immediately
    /// after this returns.
    pub fn is_valid_now(&self) -> bool {
        self.shared.has_catalog.load(Ordering::SeqCst) && self.shared.stamps_match()
    }

    /// Number of readers currently holding a [`CatalogGuard`]
    pub fn active_readers(&self) -> u32 {
        self.shared.state.lock().n_acquired
    }

    /// Register an invalidation-source handle for the catalog being built.
    ///
    /// May only be called from inside the build callback; the handle is
    /// dropped when the next rebuild attempt starts.
    ///
    /// # Panics
    ///
    /// Panics when no build is in flight.
    pub fn add_watch(&self, handle: Box<dyn WatchHandle>) {
        let mut state = self.shared.state.lock();
        assert!(
            state.building,
            "add_watch called outside a build callback"
        );
        state.watches.push(handle);
    }
}

/// Derived lookup from desktop launchable id to the positions of the
/// desktop applications that declare it
fn index_by_launchable(catalog: &Catalog) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (pos, component) in catalog.components.iter().enumerate() {
        if component.kind != ComponentKind::DesktopApplication {
            continue;
        }
        for launchable in &component.launchables {
            if !launchable.is_empty() {
                index.entry(launchable.clone()).or_default().push(pos);
            }
        }
    }
    index
}

/// Shared read access to the current catalog
///
/// Obtained from [`CatalogCache::acquire`]. The catalog and its derived
/// metadata stay unchanged for as long as the guard lives; dropping it
/// releases the access and may unblock a waiting rebuild.
pub struct CatalogGuard<'a> {
    cache: &'a CatalogCache,
    entry: Arc<Entry>,
}

impl CatalogGuard<'_> {
    pub fn catalog(&self) -> &Catalog {
        &self.entry.catalog
    }

    /// Index file the catalog was loaded from, when known
    pub fn origin(&self) -> Option<&Path> {
        self.entry.catalog.origin.as_deref()
    }

    pub fn scope(&self) -> Scope {
        self.entry.catalog.scope
    }

    /// Desktop applications declaring the given desktop launchable id
    pub fn components_for_launchable(
        &self,
        desktop_id: &str,
    ) -> impl Iterator<Item = &Component> {
        self.entry
            .by_launchable
            .get(desktop_id)
            .into_iter()
            .flatten()
            .map(|&pos| &self.entry.catalog.components[pos])
    }
}

impl std::fmt::Debug for CatalogGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogGuard")
            .field("scope", &self.scope())
            .finish_non_exhaustive()
    }
}

impl Drop for CatalogGuard<'_> {
    fn drop(&mut self) {
        self.cache.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ComponentKind;

    fn desktop_component(id: &str, launchables: &[&str]) -> Component {
        Component {
            id: id.to_string(),
            kind: ComponentKind::DesktopApplication,
            name: None,
            summary: None,
            launchables: launchables.iter().map(|s| s.to_string()).collect(),
            pkgname: None,
        }
    }

    #[test]
    fn test_index_by_launchable() {
        let catalog = Catalog {
            origin: None,
            scope: Scope::Unknown,
            components: vec![
                desktop_component("org.example.A", &["org.example.A.desktop"]),
                Component {
                    kind: ComponentKind::Addon,
                    ..desktop_component("org.example.A.Addon", &["org.example.A.desktop"])
                },
                desktop_component("org.example.B", &["org.example.A.desktop", ""]),
            ],
        };

        let index = index_by_launchable(&catalog);
        // The addon and the empty launchable are skipped.
        assert_eq!(index.len(), 1);
        assert_eq!(index["org.example.A.desktop"], [0, 2]);
    }

    #[test]
    fn test_fresh_cache_is_not_valid() {
        let cache = CatalogCache::new(|_, _, _| Ok(Catalog::default()));
        assert!(!cache.is_valid_now());
        assert_eq!(cache.active_readers(), 0);

        let guard = cache.acquire(false, None).unwrap();
        assert!(cache.is_valid_now());
        assert_eq!(cache.active_readers(), 1);
        drop(guard);
        assert_eq!(cache.active_readers(), 0);
    }

    #[test]
    #[should_panic(expected = "release without a matching acquire")]
    fn test_release_without_acquire_panics() {
        let cache = CatalogCache::new(|_, _, _| Ok(Catalog::default()));
        cache.release();
    }

    #[test]
    #[should_panic(expected = "add_watch called outside a build callback")]
    fn test_add_watch_outside_build_panics() {
        let cache = CatalogCache::new(|_, _, _| Ok(Catalog::default()));
        cache.add_watch(Box::new(()));
    }

    #[test]
    fn test_interactive_hint_reaches_builder() {
        let cache = CatalogCache::new(|_: &CatalogCache, interactive, _| {
            assert!(interactive);
            Ok(Catalog::default())
        });
        drop(cache.acquire(true, None).unwrap());
    }
}
