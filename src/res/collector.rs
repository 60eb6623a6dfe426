//! Scheduling of unused-asset sweeps.
//!
//! A sweep is expensive, so it never runs on demand. Requests only raise
//! flags, and the tick decides: a forced request starts a sweep at the next
//! opportunity, a preordered one waits for the minimum interval, and the
//! maximum interval starts one with no request at all. Exactly one backing
//! sweep operation is in flight at a time; requests raised while it runs
//! are coalesced into it.

use crate::store::{Store, SweepOperation};

use super::pool::AssetHandlePool;

enum CollectorState {
    Idle,
    Sweeping {
        op: Box<dyn SweepOperation>,
        forced: bool,
    },
    /// One-tick state after a sweep completes; the optional GC hint has
    /// already run when it is entered.
    CoolingDown,
}

pub struct UnusedAssetCollector {
    state: CollectorState,
    force_requested: bool,
    preorder_requested: bool,
    gc_requested: bool,
    elapsed: f32,
    min_interval: f32,
    max_interval: f32,
    gc_hint: Option<Box<dyn FnMut()>>,
}

impl UnusedAssetCollector {
    pub fn new(min_interval: f32, max_interval: f32) -> Self {
        UnusedAssetCollector {
            state: CollectorState::Idle,
            force_requested: false,
            preorder_requested: false,
            gc_requested: false,
            elapsed: 0.0,
            min_interval,
            max_interval,
            gc_hint: None,
        }
    }

    /// Installs the hint that runs once after a sweep that was requested
    /// with `gc = true` completes.
    pub fn set_gc_hint<F: FnMut() + 'static>(&mut self, hint: F) {
        self.gc_hint = Some(Box::new(hint));
    }

    /// Requests a sweep at the next tick, disposing unreferenced entries
    /// regardless of their expiry deadlines.
    pub fn request_force(&mut self, gc: bool) {
        self.force_requested = true;
        self.gc_requested |= gc;
    }

    /// Preorders a best-effort sweep once the minimum interval elapsed.
    pub fn request_preorder(&mut self, gc: bool) {
        self.preorder_requested = true;
        self.gc_requested |= gc;
    }

    pub fn is_sweeping(&self) -> bool {
        match self.state {
            CollectorState::Sweeping { .. } => true,
            _ => false,
        }
    }

    #[inline]
    pub fn min_interval(&self) -> f32 {
        self.min_interval
    }

    #[inline]
    pub fn max_interval(&self) -> f32 {
        self.max_interval
    }

    pub(crate) fn update(&mut self, dt: f32, store: &dyn Store, pool: &mut AssetHandlePool) {
        self.elapsed += dt;

        let state = ::std::mem::replace(&mut self.state, CollectorState::Idle);
        self.state = match state {
            CollectorState::Idle => {
                let due = self.force_requested
                    || self.elapsed >= self.max_interval
                    || (self.preorder_requested && self.elapsed >= self.min_interval);

                if due {
                    info!("Unload unused assets...");
                    let forced = self.force_requested;
                    self.force_requested = false;
                    self.preorder_requested = false;
                    self.elapsed = 0.0;
                    CollectorState::Sweeping {
                        op: store.sweep_unused(),
                        forced,
                    }
                } else {
                    CollectorState::Idle
                }
            }
            CollectorState::Sweeping { mut op, forced } => {
                if op.poll().is_done() {
                    for token in pool.sweep(forced) {
                        store.release_asset(token);
                    }

                    // Requests raised while the sweep ran are satisfied by
                    // it; do not queue another pass.
                    self.force_requested = false;
                    self.preorder_requested = false;

                    if self.gc_requested {
                        self.gc_requested = false;
                        if let Some(hint) = self.gc_hint.as_mut() {
                            info!("GC hint...");
                            hint();
                        }
                    }

                    CollectorState::CoolingDown
                } else {
                    CollectorState::Sweeping { op, forced }
                }
            }
            CollectorState::CoolingDown => CollectorState::Idle,
        };
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::super::pool::PoolParams;
    use super::*;
    use crate::errors::*;
    use crate::package::PackageDescriptor;
    use crate::scene::SceneRole;
    use crate::store::*;

    /// A store whose sweep operations take a configurable number of polls.
    struct SlowSweepStore {
        sweep_polls: u32,
        sweeps_started: Rc<Cell<u32>>,
    }

    struct SlowSweepOperation {
        left: u32,
    }

    impl SweepOperation for SlowSweepOperation {
        fn poll(&mut self) -> OpStatus {
            if self.left == 0 {
                OpStatus::Succeed
            } else {
                self.left -= 1;
                OpStatus::Pending
            }
        }
    }

    impl Store for SlowSweepStore {
        fn initialize(&self, _: &PackageDescriptor) -> Box<dyn InitOperation> {
            unimplemented!()
        }

        fn query_version(&self, _: &PackageDescriptor) -> Box<dyn VersionOperation> {
            unimplemented!()
        }

        fn load_asset(&self, _: &AssetInfo, _: u32) -> Box<dyn AssetOperation> {
            unimplemented!()
        }

        fn load_asset_sync(&self, _: &AssetInfo) -> Result<AssetObject> {
            unimplemented!()
        }

        fn load_scene(&self, _: &str, _: SceneRole, _: bool, _: u32) -> Box<dyn SceneOperation> {
            unimplemented!()
        }

        fn release_asset(&self, _: AssetToken) {}

        fn sweep_unused(&self) -> Box<dyn SweepOperation> {
            self.sweeps_started.set(self.sweeps_started.get() + 1);
            Box::new(SlowSweepOperation {
                left: self.sweep_polls,
            })
        }

        fn destroy(&self) {}
    }

    fn testbed(sweep_polls: u32) -> (SlowSweepStore, Rc<Cell<u32>>, AssetHandlePool) {
        let started = Rc::new(Cell::new(0));
        let store = SlowSweepStore {
            sweep_polls,
            sweeps_started: started.clone(),
        };
        (store, started, AssetHandlePool::new(PoolParams::default()))
    }

    #[test]
    fn force_coalesces_while_sweeping() {
        let (store, started, mut pool) = testbed(3);
        let mut collector = UnusedAssetCollector::new(60.0, 300.0);

        collector.request_force(false);
        collector.request_force(false);
        collector.update(0.1, &store, &mut pool);
        assert!(collector.is_sweeping());
        assert_eq!(started.get(), 1);

        // More force requests while the backing sweep is in flight.
        collector.request_force(false);
        for _ in 0..8 {
            collector.update(0.1, &store, &mut pool);
        }

        assert!(!collector.is_sweeping());
        assert_eq!(started.get(), 1);
    }

    #[test]
    fn preorder_respects_min_interval() {
        let (store, started, mut pool) = testbed(0);
        let mut collector = UnusedAssetCollector::new(60.0, 300.0);

        collector.request_preorder(false);
        collector.update(1.0, &store, &mut pool);
        assert_eq!(started.get(), 0);

        collector.update(59.5, &store, &mut pool);
        assert_eq!(started.get(), 1);
    }

    #[test]
    fn max_interval_sweeps_unprompted() {
        let (store, started, mut pool) = testbed(0);
        let mut collector = UnusedAssetCollector::new(60.0, 300.0);

        for _ in 0..10 {
            collector.update(25.0, &store, &mut pool);
        }

        // 250 elapsed seconds: below the maximum interval, no request.
        assert_eq!(started.get(), 0);

        collector.update(55.0, &store, &mut pool);
        assert_eq!(started.get(), 1);
    }

    #[test]
    fn gc_hint_runs_once() {
        let (store, _, mut pool) = testbed(0);
        let mut collector = UnusedAssetCollector::new(60.0, 300.0);

        let hits = Rc::new(Cell::new(0));
        let probe = hits.clone();
        collector.set_gc_hint(move || probe.set(probe.get() + 1));

        collector.request_force(true);
        for _ in 0..4 {
            collector.update(0.1, &store, &mut pool);
        }
        assert_eq!(hits.get(), 1);

        collector.request_force(false);
        for _ in 0..4 {
            collector.update(0.1, &store, &mut pool);
        }
        assert_eq!(hits.get(), 1);
    }
}
