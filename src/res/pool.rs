//! The reference-counted asset handle pool.
//!
//! Loaded assets are wrapped in pooled entries addressed by `AssetHandle`,
//! an index + version pair; a swept slot can never be confused with a stale
//! handle. Entries are keyed by the identity of the backing token: whether
//! two acquires of the same location share an entry depends entirely on
//! whether the backing store deduplicated them, the pool just manages the
//! lifetime of whatever tokens it is given.
//!
//! Dropping the last reference does not dispose the entry. It moves onto a
//! free list with a deadline of `now + expire_time`, and a later `respawn`
//! pulls it back without churning the store. Only a sweep whose deadline has
//! elapsed actually disposes the backing token; the returned tokens must be
//! handed back to the store by the caller.

use smallvec::SmallVec;

use crate::store::{AssetObject, AssetToken};
use crate::utils::{FastHashMap, ObjectPool};

impl_handle!(AssetHandle);

/// Identity of a caller-side object bound to a pooled asset, e.g. an
/// instance spawned from a loaded prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// Lifetime state of a pooled entry. `Released` entries sit on the free
/// list awaiting expiry; they are still resurrectable through `respawn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Ready,
    Released,
}

/// Configuration surface of the pool. `capacity` is advisory: it does not
/// reject spawns, it makes sweeps evict unreferenced entries beyond it even
/// before their deadlines elapse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    pub capacity: usize,
    /// Seconds an unreferenced entry survives before a sweep may dispose it.
    pub expire_time: f32,
    pub priority: i32,
    /// Seconds between automatic sweeps.
    pub auto_release_interval: f32,
}

impl Default for PoolParams {
    fn default() -> Self {
        PoolParams {
            capacity: 64,
            expire_time: 60.0,
            priority: 0,
            auto_release_interval: 60.0,
        }
    }
}

struct Entry {
    name: String,
    target: Option<TargetId>,
    object: AssetObject,
    rc: u32,
    /// Deadline for disposal; `Some` exactly while `rc == 0`.
    expire_at: Option<f64>,
    free_stamp: u64,
}

pub struct AssetHandlePool {
    entries: ObjectPool<AssetHandle, Entry>,
    tokens: FastHashMap<AssetToken, AssetHandle>,
    targets: FastHashMap<TargetId, AssetHandle>,
    params: PoolParams,
    clock: f64,
    since_sweep: f32,
    free_stamp: u64,
}

impl AssetHandlePool {
    pub fn new(params: PoolParams) -> Self {
        AssetHandlePool {
            entries: ObjectPool::new(),
            tokens: FastHashMap::default(),
            targets: FastHashMap::default(),
            params,
            clock: 0.0,
            since_sweep: 0.0,
            free_stamp: 0,
        }
    }

    /// Wraps a loaded asset in a pooled entry, or bumps the reference count
    /// of the entry already wrapping the same backing token.
    pub fn spawn<T: Into<String>>(
        &mut self,
        name: T,
        target: Option<TargetId>,
        object: AssetObject,
    ) -> AssetHandle {
        if let Some(&handle) = self.tokens.get(&object.token()) {
            // The store deduplicated underneath; the redundant wrapper is
            // dropped, the shared token stays live.
            let entry = self.entries.get_mut(handle).expect("token map out of sync");
            entry.rc += 1;
            entry.expire_at = None;
            return handle;
        }

        let token = object.token();
        let entry = Entry {
            name: name.into(),
            target,
            object,
            rc: 1,
            expire_at: None,
            free_stamp: 0,
        };

        let handle = self.entries.create(entry);
        self.tokens.insert(token, handle);

        if let Some(target) = target {
            self.targets.insert(target, handle);
        }

        handle
    }

    /// Takes an additional reference on `handle`, cancelling a pending
    /// expiry if the entry was sitting on the free list. Returns false if
    /// the handle is no longer alive.
    pub fn respawn(&mut self, handle: AssetHandle) -> bool {
        match self.entries.get_mut(handle) {
            Some(entry) => {
                entry.rc += 1;
                entry.expire_at = None;
                true
            }
            None => false,
        }
    }

    /// Drops a reference on `handle`. At zero the entry is not disposed,
    /// it moves onto the free list with a deadline of `now + expire_time`.
    ///
    /// Releasing a handle that is unknown, swept, or already at zero is a
    /// double-release bug upstream and panics.
    pub fn unspawn(&mut self, handle: AssetHandle) {
        let expire_at = self.clock + f64::from(self.params.expire_time);
        let stamp = self.free_stamp;

        let entry = self
            .entries
            .get_mut(handle)
            .unwrap_or_else(|| panic!("unspawn of unknown asset handle {}", handle));

        assert!(
            entry.rc > 0,
            "unspawn of released asset handle {} ('{}')",
            handle,
            entry.name
        );

        entry.rc -= 1;
        if entry.rc == 0 {
            entry.expire_at = Some(expire_at);
            entry.free_stamp = stamp;
            self.free_stamp += 1;
        }
    }

    /// Drops a reference through the bound target object identity.
    pub fn unspawn_target(&mut self, target: TargetId) {
        let handle = *self
            .targets
            .get(&target)
            .unwrap_or_else(|| panic!("unspawn of unknown target {:?}", target));
        self.unspawn(handle);
    }

    /// Advances the pool clock. Returns true when the auto-release interval
    /// elapsed and the caller should run a sweep.
    pub fn update(&mut self, dt: f32) -> bool {
        self.clock += f64::from(dt);
        self.since_sweep += dt;
        self.since_sweep >= self.params.auto_release_interval
    }

    /// Disposes unreferenced entries and returns their backing tokens for
    /// release. A regular sweep only disposes entries whose deadlines have
    /// elapsed, then keeps evicting the oldest free entries while the pool
    /// is over capacity; a forced sweep ignores deadlines entirely.
    pub fn sweep(&mut self, force: bool) -> SmallVec<[AssetToken; 8]> {
        self.since_sweep = 0.0;

        let clock = self.clock;
        let mut disposable: Vec<(u64, AssetHandle)> = Vec::new();
        let mut kept_free = 0;

        for (handle, entry) in self.entries.iter() {
            if let Some(deadline) = entry.expire_at {
                if force || deadline <= clock {
                    disposable.push((entry.free_stamp, handle));
                } else {
                    kept_free += 1;
                }
            }
        }

        // Soft capacity pressure: evict the oldest unexpired free entries
        // while the pool would still be over capacity.
        if !force {
            let over = (self.entries.len() - disposable.len()).saturating_sub(self.params.capacity);
            if over > 0 && kept_free > 0 {
                let mut unexpired: Vec<(u64, AssetHandle)> = self
                    .entries
                    .iter()
                    .filter(|(_, e)| e.expire_at.map(|d| d > clock).unwrap_or(false))
                    .map(|(h, e)| (e.free_stamp, h))
                    .collect();
                unexpired.sort();
                disposable.extend(unexpired.into_iter().take(over));
            }
        }

        let mut tokens = SmallVec::new();
        for (_, handle) in disposable {
            let entry = self.entries.free(handle).expect("sweep of dead handle");
            self.tokens.remove(&entry.object.token());
            if let Some(target) = entry.target {
                self.targets.remove(&target);
            }
            tokens.push(entry.object.token());
        }

        if !tokens.is_empty() {
            info!("Sweeps {} expired asset handles.", tokens.len());
        }

        tokens
    }

    /// Disposes every entry regardless of reference counts and deadlines,
    /// returning all backing tokens. Shutdown only.
    pub fn drain(&mut self) -> SmallVec<[AssetToken; 8]> {
        let handles: Vec<_> = self.entries.handles().collect();

        let mut tokens = SmallVec::new();
        for handle in handles {
            let entry = self.entries.free(handle).expect("drain of dead handle");
            tokens.push(entry.object.token());
        }

        self.tokens.clear();
        self.targets.clear();
        tokens
    }

    /// Returns the loaded asset wrapped by `handle`.
    #[inline]
    pub fn get(&self, handle: AssetHandle) -> Option<&AssetObject> {
        self.entries.get(handle).map(|v| &v.object)
    }

    /// Returns the handle wrapping `target`, if any.
    #[inline]
    pub fn find_target(&self, target: TargetId) -> Option<AssetHandle> {
        self.targets.get(&target).cloned()
    }

    #[inline]
    pub fn name(&self, handle: AssetHandle) -> Option<&str> {
        self.entries.get(handle).map(|v| v.name.as_str())
    }

    #[inline]
    pub fn ref_count(&self, handle: AssetHandle) -> Option<u32> {
        self.entries.get(handle).map(|v| v.rc)
    }

    #[inline]
    pub fn state(&self, handle: AssetHandle) -> Option<HandleState> {
        self.entries.get(handle).map(|v| {
            if v.rc > 0 {
                HandleState::Ready
            } else {
                HandleState::Released
            }
        })
    }

    #[inline]
    pub fn contains(&self, handle: AssetHandle) -> bool {
        self.entries.contains(handle)
    }

    /// Number of entries, referenced or awaiting expiry.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.params.capacity
    }

    #[inline]
    pub fn set_capacity(&mut self, capacity: usize) {
        self.params.capacity = capacity;
    }

    #[inline]
    pub fn expire_time(&self) -> f32 {
        self.params.expire_time
    }

    /// Affects entries released after the change; pending deadlines stay.
    #[inline]
    pub fn set_expire_time(&mut self, seconds: f32) {
        self.params.expire_time = seconds;
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.params.priority
    }

    #[inline]
    pub fn set_priority(&mut self, priority: i32) {
        self.params.priority = priority;
    }

    #[inline]
    pub fn auto_release_interval(&self) -> f32 {
        self.params.auto_release_interval
    }

    #[inline]
    pub fn set_auto_release_interval(&mut self, seconds: f32) {
        self.params.auto_release_interval = seconds;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::AssetObject;

    fn object(token: u64) -> AssetObject {
        AssetObject::new(AssetToken(token), "bytes", Box::new(vec![0u8; 4]))
    }

    fn pool(expire: f32) -> AssetHandlePool {
        AssetHandlePool::new(PoolParams {
            capacity: 64,
            expire_time: expire,
            priority: 0,
            auto_release_interval: 1000.0,
        })
    }

    #[test]
    fn spawn_shares_by_token() {
        let mut pool = pool(10.0);

        let h1 = pool.spawn("foo", None, object(1));
        let h2 = pool.spawn("foo", None, object(1));
        assert_eq!(h1, h2);
        assert_eq!(pool.ref_count(h1), Some(2));

        let h3 = pool.spawn("foo", None, object(2));
        assert_ne!(h1, h3);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn expiry() {
        let mut pool = pool(10.0);
        let h = pool.spawn("foo", None, object(1));

        pool.unspawn(h);
        assert_eq!(pool.state(h), Some(HandleState::Released));

        // Still within the expiry window.
        pool.update(5.0);
        assert!(pool.sweep(false).is_empty());
        assert!(pool.contains(h));

        pool.update(6.0);
        let tokens = pool.sweep(false);
        assert_eq!(tokens.as_slice(), &[AssetToken(1)]);
        assert!(!pool.contains(h));
    }

    #[test]
    fn respawn_cancels_expiry() {
        let mut pool = pool(10.0);
        let h = pool.spawn("foo", None, object(1));

        pool.unspawn(h);
        assert!(pool.respawn(h));
        assert_eq!(pool.state(h), Some(HandleState::Ready));

        pool.update(1000.0);
        assert!(pool.sweep(false).is_empty());
        assert!(pool.contains(h));
    }

    #[test]
    fn forced_sweep_ignores_deadlines() {
        let mut pool = pool(1000.0);
        let h1 = pool.spawn("foo", None, object(1));
        let h2 = pool.spawn("bar", None, object(2));

        pool.unspawn(h1);
        assert_eq!(pool.sweep(true).len(), 1);
        assert!(!pool.contains(h1));
        assert!(pool.contains(h2));
    }

    #[test]
    fn capacity_pressure() {
        let mut pool = AssetHandlePool::new(PoolParams {
            capacity: 2,
            expire_time: 1000.0,
            priority: 0,
            auto_release_interval: 1000.0,
        });

        let handles: Vec<_> = (0..4)
            .map(|i| pool.spawn(format!("a{}", i), None, object(i)))
            .collect();
        for &v in &handles {
            pool.unspawn(v);
        }

        // Nothing has expired, but the pool is over capacity; the two
        // oldest-released entries go first.
        let tokens = pool.sweep(false);
        assert_eq!(tokens.len(), 2);
        assert!(!pool.contains(handles[0]));
        assert!(!pool.contains(handles[1]));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn unspawn_by_target() {
        let mut pool = pool(10.0);
        let h = pool.spawn("foo", Some(TargetId(7)), object(1));
        assert_eq!(pool.find_target(TargetId(7)), Some(h));

        pool.unspawn_target(TargetId(7));
        assert_eq!(pool.state(h), Some(HandleState::Released));
    }

    #[test]
    #[should_panic(expected = "released")]
    fn double_unspawn() {
        let mut pool = pool(10.0);
        let h = pool.spawn("foo", None, object(1));
        pool.unspawn(h);
        pool.unspawn(h);
    }

    #[test]
    #[should_panic(expected = "unknown")]
    fn unspawn_after_sweep() {
        let mut pool = pool(0.0);
        let h = pool.spawn("foo", None, object(1));
        pool.unspawn(h);
        pool.sweep(true);
        pool.unspawn(h);
    }

    #[test]
    fn stress() {
        use rand::prelude::*;

        let mut rng = rand::thread_rng();
        let mut pool = pool(1.0);
        let mut live: Vec<AssetHandle> = Vec::new();

        for i in 0..1024u64 {
            if live.is_empty() || rng.gen::<bool>() {
                live.push(pool.spawn(format!("v{}", i), None, object(i + 1)));
            } else {
                let v = live.swap_remove(rng.gen_range(0, live.len()));
                pool.unspawn(v);
            }

            if i % 64 == 0 {
                pool.update(2.0);
                pool.sweep(false);
            }

            for &v in &live {
                assert_eq!(pool.state(v), Some(HandleState::Ready));
            }
        }
    }
}
