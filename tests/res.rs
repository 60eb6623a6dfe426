extern crate capstan;

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use capstan::prelude::*;
use common::TestStore;

fn settings() -> Settings {
    Settings {
        packages: vec![PackageDescriptor {
            time_slice_ms: 1000,
            ..Default::default()
        }],
        resources: ResourceParams {
            time_slice_ms: 1000,
            pool: PoolParams {
                capacity: 64,
                expire_time: 10.0,
                priority: 0,
                auto_release_interval: 1.0,
            },
            min_unload_interval: 60.0,
            max_unload_interval: 300.0,
        },
    }
}

fn testbed(store: &TestStore) -> Context {
    let mut ctx = Context::new(Rc::new(store.clone()), settings());

    let ready = Rc::new(Cell::new(false));
    let probe = ready.clone();
    ctx.init_package("DefaultPackage", 5.0, move |v| {
        v.unwrap();
        probe.set(true);
    })
    .unwrap();

    ctx.update(0.01);
    assert!(ready.get());
    ctx
}

#[test]
fn sync_load() {
    let store = TestStore::new();
    store.add_asset("foo", "bytes", &[1, 2, 3]);

    let mut ctx = testbed(&store);

    let handle = ctx.load_asset_sync("foo", "bytes").unwrap();
    assert_eq!(ctx.resources.pool().ref_count(handle), Some(1));
    assert_eq!(ctx.resources.pool().state(handle), Some(HandleState::Ready));

    let object = ctx.resources.pool().get(handle).unwrap();
    assert_eq!(object.downcast_ref::<Vec<u8>>().unwrap(), &vec![1, 2, 3]);

    match ctx.load_asset_sync("missing", "bytes") {
        Err(Error::NotExist(v)) => assert_eq!(v, "missing"),
        v => panic!("unexpected {:?}", v.map(|_| ())),
    }

    match ctx.load_asset_sync("", "bytes") {
        Err(Error::InvalidArgument(_)) => {}
        v => panic!("unexpected {:?}", v.map(|_| ())),
    }
}

#[test]
fn not_exist_reports_through_failure_callback() {
    let store = TestStore::new();
    let mut ctx = testbed(&store);

    let status = Rc::new(RefCell::new(None));
    let probe = status.clone();
    let callbacks = LoadAssetCallbacks::new(|_, _, _| panic!("must not succeed"))
        .on_failure(move |name, status, _| {
            assert_eq!(name, "missing");
            *probe.borrow_mut() = Some(status);
        });

    ctx.load_asset_async("missing", "bytes", 0, callbacks).unwrap();

    // Reported at the call site; no backing operation ever starts and the
    // pool is untouched.
    assert_eq!(*status.borrow(), Some(LoadResourceStatus::NotExist));
    assert_eq!(store.inner.loads_started.get(), 0);
    assert_eq!(ctx.resources.pending_loads(), 0);
    assert_eq!(ctx.resources.pool().len(), 0);
}

#[test]
fn not_exist_without_failure_callback_is_an_error() {
    let store = TestStore::new();
    let mut ctx = testbed(&store);

    let callbacks = LoadAssetCallbacks::new(|_, _, _| panic!("must not succeed"));
    match ctx.load_asset_async("missing", "bytes", 0, callbacks) {
        Err(Error::NotExist(_)) => {}
        v => panic!("unexpected {:?}", v),
    }
}

#[test]
fn async_load() {
    let store = TestStore::new();
    store.add_slow_asset("foo", "bytes", &[7], 2);

    let mut ctx = testbed(&store);

    let loaded = Rc::new(RefCell::new(None));
    let probe = loaded.clone();
    let callbacks = LoadAssetCallbacks::new(move |name, handle, duration| {
        assert_eq!(name, "foo");
        *probe.borrow_mut() = Some((handle, duration));
    });

    ctx.load_asset_async("foo", "bytes", 0, callbacks).unwrap();
    assert_eq!(ctx.resources.pending_loads(), 1);

    ctx.update(0.5);
    ctx.update(0.5);
    assert!(loaded.borrow().is_none());

    ctx.update(0.5);
    let completed: Option<(AssetHandle, f32)> = *loaded.borrow();
    let (handle, duration) = completed.expect("load completed");
    assert!(duration > 0.0);
    assert_eq!(ctx.resources.pending_loads(), 0);
    assert_eq!(ctx.resources.pool().ref_count(handle), Some(1));
}

#[test]
fn concurrent_loads_of_one_location_are_independent() {
    let store = TestStore::new();
    store.add_slow_asset("bar", "bytes", &[1], 2);

    let mut ctx = testbed(&store);

    let results = Rc::new(RefCell::new(Vec::new()));

    let probe = results.clone();
    let first = LoadAssetCallbacks::new(move |_, handle, duration| {
        probe.borrow_mut().push((handle, duration));
    });
    ctx.load_asset_async("bar", "bytes", 0, first).unwrap();

    ctx.update(0.5);

    let probe = results.clone();
    let second = LoadAssetCallbacks::new(move |_, handle, duration| {
        probe.borrow_mut().push((handle, duration));
    });
    ctx.load_asset_async("bar", "bytes", 0, second).unwrap();

    for _ in 0..8 {
        ctx.update(0.5);
    }

    // Two independent backing operations, two distinct handles, and two
    // independently measured elapsed times.
    let results = results.borrow();
    assert_eq!(store.inner.loads_started.get(), 2);
    assert_eq!(results.len(), 2);
    assert_ne!(results[0].0, results[1].0);
    assert!(results[0].1 > 0.0 && results[1].1 > 0.0);
    assert_eq!(ctx.resources.pool().len(), 2);
}

#[test]
fn backing_failure_reports_not_ready() {
    let store = TestStore::new();
    store.add_failing_asset("broken", "bytes");

    let mut ctx = testbed(&store);

    let failed = Rc::new(RefCell::new(None));
    let probe = failed.clone();
    let callbacks = LoadAssetCallbacks::new(|_, _, _| panic!("must not succeed")).on_failure(
        move |name, status, message| {
            assert_eq!(name, "broken");
            *probe.borrow_mut() = Some((status, message.to_string()));
        },
    );

    ctx.load_asset_async("broken", "bytes", 0, callbacks).unwrap();
    ctx.update(0.1);

    let failed = failed.borrow();
    let (status, message) = failed.as_ref().expect("failure reported");
    assert_eq!(*status, LoadResourceStatus::NotReady);
    assert!(message.contains("scripted load failure"));
    assert_eq!(ctx.resources.pool().len(), 0);
}

#[test]
fn kind_mismatch_is_a_load_failure() {
    let store = TestStore::new();
    store.add_asset("foo", "bytes", &[1]);

    let mut ctx = testbed(&store);

    match ctx.load_asset_sync("foo", "text") {
        Err(Error::LoadFailed { location, message }) => {
            assert_eq!(location, "foo");
            assert!(message.contains("kind"));
        }
        v => panic!("unexpected {:?}", v.map(|_| ())),
    }

    let status = Rc::new(RefCell::new(None));
    let probe = status.clone();
    let callbacks = LoadAssetCallbacks::new(|_, _, _| panic!("must not succeed"))
        .on_failure(move |_, status, _| *probe.borrow_mut() = Some(status));

    ctx.load_asset_async("foo", "text", 0, callbacks).unwrap();
    assert_eq!(*status.borrow(), Some(LoadResourceStatus::NotReady));

    // The untagged form accepts whatever the manifest declares.
    assert!(ctx.load_asset_sync("foo", "").is_ok());
}

#[test]
fn has_asset() {
    let store = TestStore::new();
    store.add_asset("foo", "bytes", &[1]);

    let ctx = testbed(&store);
    assert_eq!(ctx.has_asset("foo").unwrap(), HasAssetResult::AssetOnDisk);
    assert_eq!(ctx.has_asset("nope").unwrap(), HasAssetResult::NotExist);
    assert!(ctx.has_asset("").is_err());
}

#[test]
fn shutdown_releases_everything() {
    let store = TestStore::new();
    store.add_asset("foo", "bytes", &[1]);

    let mut ctx = testbed(&store);
    let handle = ctx.load_asset_sync("foo", "bytes").unwrap();
    let token = ctx.resources.pool().get(handle).unwrap().token();
    drop(ctx);

    assert!(store.inner.destroyed.get());
    assert_eq!(store.released(), vec![token]);
}
