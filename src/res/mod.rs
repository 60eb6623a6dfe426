//! The `ResourceManager` takes care of loading assets on demand from named
//! packages, synchronously or asynchronously, and of sharing and reclaiming
//! them safely once loaded.
//!
//! # Location
//!
//! Callers never touch file paths or URLs. An asset is requested by its
//! `Location`, a symbolic string that is unique within a package, e.g.
//!
//! ```sh
//! "textures/crate.png"
//! ```
//!
//! The `PackageRegistry` resolves a location against the manifests of every
//! ready package; where the bytes actually come from (a bundled directory,
//! loose editor files, a host server) is the backing store's business.
//!
//! # Handle
//!
//! A loaded asset is wrapped in a pooled entry and exposed as an
//! `AssetHandle`, an index + version pair. This approach has several
//! advantages, since it helps for saving state externally:
//!
//! 1. The underlying asset can be reclaimed without leaving dangling
//!    pointers behind; a stale handle simply stops resolving.
//! 2. Handles are plain `Copy` values, safe to store and pass around
//!    regardless of what the backing store is doing meanwhile.
//!
//! Callers only ever observe terminal handles: a handle returned from a
//! synchronous load, or delivered through a success callback, is always
//! backed by a fully loaded asset. In-flight loads are internal to the
//! polling loop.
//!
//! # Ownership & Lifetime
//!
//! Reference counting provides shared ownership. Every spawn of an entry
//! increases its reference count by 1, and it is the caller's
//! responsibility to drop ownership with `unload_asset` eventually. When
//! the last reference is dropped the entry is *not* destroyed: it lingers
//! on a free list until its expiry deadline passes, so that a quickly
//! re-requested asset is resurrected instead of reloaded. The periodic
//! sweep, scheduled by the `UnusedAssetCollector`, is the only place
//! where backing tokens are actually disposed.

pub mod collector;
pub mod pool;

pub use self::collector::UnusedAssetCollector;
pub use self::pool::{AssetHandle, AssetHandlePool, HandleState, PoolParams, TargetId};

use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::errors::*;
use crate::package::PackageRegistry;
use crate::store::{AssetOperation, OpStatus, Store};

/// Why an asset load failed, as reported to failure callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResourceStatus {
    /// The location resolves to nothing.
    NotExist,
    /// The backing operation did not produce a usable asset.
    NotReady,
}

/// Result of an existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasAssetResult {
    NotExist,
    AssetOnDisk,
}

/// Callbacks of an asynchronous asset load. The success callback is
/// mandatory; without a failure callback, failures that occur after the
/// call site (backing-store failures) are logged instead.
pub struct LoadAssetCallbacks {
    success: Box<dyn FnOnce(&str, AssetHandle, f32)>,
    failure: Option<Box<dyn FnOnce(&str, LoadResourceStatus, &str)>>,
}

impl LoadAssetCallbacks {
    /// Creates a callback set from the mandatory success callback, invoked
    /// as `(location, handle, duration_seconds)`.
    pub fn new<F>(success: F) -> Self
    where
        F: FnOnce(&str, AssetHandle, f32) + 'static,
    {
        LoadAssetCallbacks {
            success: Box::new(success),
            failure: None,
        }
    }

    /// Adds a failure callback, invoked as `(location, status, message)`.
    pub fn on_failure<F>(mut self, failure: F) -> Self
    where
        F: FnOnce(&str, LoadResourceStatus, &str) + 'static,
    {
        self.failure = Some(Box::new(failure));
        self
    }
}

/// Knobs of the resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceParams {
    /// Per-tick budget in milliseconds for progressing asynchronous loads.
    pub time_slice_ms: u64,
    pub pool: PoolParams,
    /// Seconds a preordered unused-asset sweep waits at least.
    pub min_unload_interval: f32,
    /// Seconds after which a sweep runs even without a request.
    pub max_unload_interval: f32,
}

impl Default for ResourceParams {
    fn default() -> Self {
        ResourceParams {
            time_slice_ms: 30,
            pool: PoolParams::default(),
            min_unload_interval: 60.0,
            max_unload_interval: 300.0,
        }
    }
}

struct PendingLoad {
    location: String,
    started_at: f64,
    op: Box<dyn AssetOperation>,
    callbacks: LoadAssetCallbacks,
}

/// Orchestrates asset loads against the backing store and owns the handle
/// pool that shares the results.
///
/// Concurrent asynchronous loads of the same location are *not*
/// deduplicated here; each call drives an independent backing operation and
/// receives its own callbacks. Stores are free to deduplicate underneath,
/// in which case the resulting handles share a pooled entry.
pub struct ResourceManager {
    store: Rc<dyn Store>,
    pool: AssetHandlePool,
    loads: Vec<PendingLoad>,
    collector: UnusedAssetCollector,
    time_slice: Duration,
    clock: f64,
}

impl ResourceManager {
    pub fn new(store: Rc<dyn Store>, params: ResourceParams) -> Self {
        ResourceManager {
            store,
            pool: AssetHandlePool::new(params.pool.clone()),
            loads: Vec::new(),
            collector: UnusedAssetCollector::new(
                params.min_unload_interval,
                params.max_unload_interval,
            ),
            time_slice: Duration::from_millis(params.time_slice_ms),
            clock: 0.0,
        }
    }

    /// Loads an asset before returning, wrapping it in a pooled handle with
    /// a reference count of 1.
    ///
    /// `kind` is the expected loader tag; pass `""` to accept whatever the
    /// manifest declares.
    pub fn load_asset_sync(
        &mut self,
        packages: &PackageRegistry,
        location: &str,
        kind: &str,
    ) -> Result<AssetHandle> {
        if location.is_empty() {
            return Err(Error::InvalidArgument("Asset location"));
        }

        let info = packages
            .resolve(location)
            .ok_or_else(|| Error::NotExist(location.to_string()))?;

        if !kind.is_empty() && &*info.kind != kind {
            return Err(Error::LoadFailed {
                location: location.to_string(),
                message: format!(
                    "Expected kind '{}' but the manifest declares '{}'.",
                    kind, info.kind
                ),
            });
        }

        let object = self
            .store
            .load_asset_sync(&info)
            .map_err(|err| Error::LoadFailed {
                location: location.to_string(),
                message: err.to_string(),
            })?;

        Ok(self.pool.spawn(location, None, object))
    }

    /// Starts an asynchronous asset load.
    ///
    /// Argument validation fails synchronously. An unresolvable location is
    /// reported through the failure callback when one is present, and
    /// returned as an error otherwise. Everything later, backing-store
    /// failures included, arrives through the callbacks during `update`.
    pub fn load_asset_async(
        &mut self,
        packages: &PackageRegistry,
        location: &str,
        kind: &str,
        priority: u32,
        callbacks: LoadAssetCallbacks,
    ) -> Result<()> {
        if location.is_empty() {
            return Err(Error::InvalidArgument("Asset location"));
        }

        let info = match packages.resolve(location) {
            Some(v) => v,
            None => {
                let message = format!("Can not load asset '{}'.", location);
                return match callbacks.failure {
                    Some(failure) => {
                        failure(location, LoadResourceStatus::NotExist, &message);
                        Ok(())
                    }
                    None => Err(Error::NotExist(location.to_string())),
                };
            }
        };

        if !kind.is_empty() && &*info.kind != kind {
            let message = format!(
                "Can not load asset '{}'. Expected kind '{}' but the manifest declares '{}'.",
                location, kind, info.kind
            );
            return match callbacks.failure {
                Some(failure) => {
                    failure(location, LoadResourceStatus::NotReady, &message);
                    Ok(())
                }
                None => Err(Error::LoadFailed {
                    location: location.to_string(),
                    message,
                }),
            };
        }

        let op = self.store.load_asset(&info, priority);
        self.loads.push(PendingLoad {
            location: location.to_string(),
            started_at: self.clock,
            op,
            callbacks,
        });

        Ok(())
    }

    /// Drops a reference on a loaded asset.
    #[inline]
    pub fn unload_asset(&mut self, handle: AssetHandle) {
        self.pool.unspawn(handle);
    }

    /// Drops a reference through the target object bound at spawn time.
    #[inline]
    pub fn unload_target(&mut self, target: TargetId) {
        self.pool.unspawn_target(target);
    }

    /// Preorders a best-effort sweep of unused assets.
    #[inline]
    pub fn unload_unused_assets(&mut self, gc: bool) {
        self.collector.request_preorder(gc);
    }

    /// Requests an unconditional sweep at the next tick, disposing
    /// unreferenced entries regardless of expiry deadlines. Used before
    /// swapping the main scene.
    #[inline]
    pub fn force_unload_all_assets(&mut self, gc: bool) {
        self.collector.request_force(gc);
    }

    /// Checks whether `location` resolves to a loadable asset.
    pub fn has_asset(
        &self,
        packages: &PackageRegistry,
        location: &str,
    ) -> Result<HasAssetResult> {
        if location.is_empty() {
            return Err(Error::InvalidArgument("Asset location"));
        }

        if packages.resolve(location).is_some() {
            Ok(HasAssetResult::AssetOnDisk)
        } else {
            Ok(HasAssetResult::NotExist)
        }
    }

    /// Drives in-flight loads under the time-slice budget, completes their
    /// callbacks, and runs the sweep machinery.
    pub fn update(&mut self, dt: f32) {
        self.clock += f64::from(dt);

        let deadline = Instant::now() + self.time_slice;
        let mut finished = Vec::new();
        let mut index = 0;
        let mut polled = 0;
        while index < self.loads.len() {
            // At least one operation makes progress per tick, however tight
            // the budget.
            if polled > 0 && Instant::now() >= deadline {
                break;
            }

            polled += 1;
            match self.loads[index].op.poll() {
                OpStatus::Pending => index += 1,
                status => finished.push((self.loads.swap_remove(index), status)),
            }
        }

        for (load, status) in finished {
            self.finish(load, status);
        }

        if self.pool.update(dt) {
            for token in self.pool.sweep(false) {
                self.store.release_asset(token);
            }
        }

        self.collector.update(dt, self.store.as_ref(), &mut self.pool);
    }

    fn finish(&mut self, mut load: PendingLoad, status: OpStatus) {
        if status == OpStatus::Succeed {
            if let Some(object) = load.op.take_asset() {
                let duration = (self.clock - load.started_at) as f32;
                let handle = self.pool.spawn(load.location.clone(), None, object);
                (load.callbacks.success)(&load.location, handle, duration);
                return;
            }
        }

        let message = format!(
            "Can not load asset '{}'. {}",
            load.location,
            load.op.error().unwrap_or("unknown")
        );
        match load.callbacks.failure {
            Some(failure) => failure(&load.location, LoadResourceStatus::NotReady, &message),
            None => error!("{}", message),
        }
    }

    /// Installs the hint that runs after a sweep requested with `gc = true`.
    #[inline]
    pub fn set_gc_hint<F: FnMut() + 'static>(&mut self, hint: F) {
        self.collector.set_gc_hint(hint);
    }

    /// Overrides the per-tick polling budget.
    #[inline]
    pub fn set_time_slice_ms(&mut self, millis: u64) {
        self.time_slice = Duration::from_millis(millis);
    }

    #[inline]
    pub fn pool(&self) -> &AssetHandlePool {
        &self.pool
    }

    #[inline]
    pub fn pool_mut(&mut self) -> &mut AssetHandlePool {
        &mut self.pool
    }

    /// Number of asynchronous loads still in flight.
    #[inline]
    pub fn pending_loads(&self) -> usize {
        self.loads.len()
    }

    #[inline]
    pub fn is_sweeping(&self) -> bool {
        self.collector.is_sweeping()
    }
}
