//! A scripted backing store for integration tests. Operation completion is
//! expressed in polls, so tests control exactly which tick observes what.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use capstan::errors::*;
use capstan::manifest::{Manifest, ManifestItem};
use capstan::package::PackageDescriptor;
use capstan::scene::SceneRole;
use capstan::store::*;
use capstan::utils::Uuid;

pub struct TestAsset {
    pub location: String,
    pub kind: &'static str,
    pub bytes: Vec<u8>,
    pub delay: u32,
    pub fail: bool,
}

#[derive(Default)]
pub struct TestStoreInner {
    pub assets: RefCell<Vec<TestAsset>>,
    pub init_delay: Cell<u32>,
    pub init_error: RefCell<Option<String>>,
    pub inits_started: Cell<u32>,
    pub scene_delay: Cell<u32>,
    pub unload_delay: Cell<u32>,
    pub sweep_delay: Cell<u32>,
    pub sweeps_started: Cell<u32>,
    pub version: RefCell<String>,
    pub loads_started: Cell<u32>,
    pub released: RefCell<Vec<AssetToken>>,
    pub next_token: Cell<u64>,
    pub destroyed: Cell<bool>,
}

#[derive(Clone)]
pub struct TestStore {
    pub inner: Rc<TestStoreInner>,
}

#[allow(dead_code)]
impl TestStore {
    pub fn new() -> Self {
        let inner = TestStoreInner::default();
        inner.next_token.set(1);
        *inner.version.borrow_mut() = "1.0.0".to_string();

        TestStore {
            inner: Rc::new(inner),
        }
    }

    pub fn add_asset(&self, location: &str, kind: &'static str, bytes: &[u8]) {
        self.add_slow_asset(location, kind, bytes, 0);
    }

    pub fn add_slow_asset(&self, location: &str, kind: &'static str, bytes: &[u8], delay: u32) {
        self.inner.assets.borrow_mut().push(TestAsset {
            location: location.to_string(),
            kind,
            bytes: bytes.to_vec(),
            delay,
            fail: false,
        });
    }

    pub fn add_failing_asset(&self, location: &str, kind: &'static str) {
        self.inner.assets.borrow_mut().push(TestAsset {
            location: location.to_string(),
            kind,
            bytes: Vec::new(),
            delay: 0,
            fail: true,
        });
    }

    pub fn released(&self) -> Vec<AssetToken> {
        self.inner.released.borrow().clone()
    }

    fn issue(&self) -> AssetToken {
        let v = self.inner.next_token.get();
        self.inner.next_token.set(v + 1);
        AssetToken(v)
    }

    fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new();
        for v in self.inner.assets.borrow().iter() {
            manifest.items.push(ManifestItem {
                location: v.location.clone(),
                path: v.location.clone(),
                kind: v.kind.into(),
                uuid: Uuid::new_v4(),
            });
        }
        manifest
    }
}

struct TestInitOperation {
    store: TestStore,
    left: u32,
    manifest: Option<Manifest>,
    error: Option<String>,
}

impl InitOperation for TestInitOperation {
    fn poll(&mut self) -> OpStatus {
        if self.left > 0 {
            self.left -= 1;
            return OpStatus::Pending;
        }

        if self.error.is_some() {
            return OpStatus::Failed;
        }

        if self.manifest.is_none() {
            self.manifest = Some(self.store.manifest());
        }
        OpStatus::Succeed
    }

    fn take_manifest(&mut self) -> Option<Manifest> {
        self.manifest.take()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|v| v.as_str())
    }
}

struct TestVersionOperation {
    store: TestStore,
    left: u32,
}

impl VersionOperation for TestVersionOperation {
    fn poll(&mut self) -> OpStatus {
        if self.left > 0 {
            self.left -= 1;
            OpStatus::Pending
        } else {
            OpStatus::Succeed
        }
    }

    fn take_version(&mut self) -> Option<String> {
        Some(self.store.inner.version.borrow().clone())
    }

    fn error(&self) -> Option<&str> {
        None
    }
}

struct TestAssetOperation {
    store: TestStore,
    location: String,
    left: u32,
    missing: bool,
    asset: Option<AssetObject>,
    error: Option<String>,
}

impl AssetOperation for TestAssetOperation {
    fn poll(&mut self) -> OpStatus {
        if self.left > 0 {
            self.left -= 1;
            return OpStatus::Pending;
        }

        if self.missing {
            self.error = Some(format!("No such location '{}'.", self.location));
        } else if self.asset.is_none() && self.error.is_none() {
            let assets = self.store.inner.assets.borrow();
            let v = assets
                .iter()
                .find(|v| v.location == self.location)
                .expect("scripted asset");

            if v.fail {
                self.error = Some("scripted load failure".to_string());
            } else {
                self.asset = Some(AssetObject::new(
                    self.store.issue(),
                    v.kind,
                    Box::new(v.bytes.clone()),
                ));
            }
        }

        if self.error.is_some() {
            OpStatus::Failed
        } else {
            OpStatus::Succeed
        }
    }

    fn progress(&self) -> f32 {
        if self.left > 0 {
            0.5
        } else {
            1.0
        }
    }

    fn take_asset(&mut self) -> Option<AssetObject> {
        self.asset.take()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|v| v.as_str())
    }
}

enum TestScenePhase {
    Working(u32),
    Suspended,
    Loaded,
    Failed(String),
}

struct TestSceneOperation {
    store: TestStore,
    suspend_load: bool,
    phase: TestScenePhase,
}

impl SceneOperation for TestSceneOperation {
    fn poll(&mut self) -> OpStatus {
        if let TestScenePhase::Working(ref mut left) = self.phase {
            if *left > 0 {
                *left -= 1;
                return OpStatus::Pending;
            }

            self.phase = if self.suspend_load {
                TestScenePhase::Suspended
            } else {
                TestScenePhase::Loaded
            };
        }

        match self.phase {
            TestScenePhase::Loaded => OpStatus::Succeed,
            TestScenePhase::Failed(_) => OpStatus::Failed,
            _ => OpStatus::Pending,
        }
    }

    fn progress(&self) -> f32 {
        match self.phase {
            TestScenePhase::Working(_) => 0.5,
            TestScenePhase::Suspended => 0.9,
            _ => 1.0,
        }
    }

    fn error(&self) -> Option<&str> {
        if let TestScenePhase::Failed(ref v) = self.phase {
            Some(v)
        } else {
            None
        }
    }

    fn activate(&mut self) -> bool {
        match self.phase {
            TestScenePhase::Loaded => true,
            _ => false,
        }
    }

    fn unsuspend(&mut self) -> bool {
        self.suspend_load = false;
        match self.phase {
            TestScenePhase::Suspended => {
                self.phase = TestScenePhase::Loaded;
                true
            }
            TestScenePhase::Loaded => true,
            TestScenePhase::Working(_) => true,
            _ => false,
        }
    }

    fn unload(&mut self) -> Box<dyn UnloadOperation> {
        Box::new(TestUnloadOperation {
            left: self.store.inner.unload_delay.get(),
        })
    }
}

struct TestUnloadOperation {
    left: u32,
}

impl UnloadOperation for TestUnloadOperation {
    fn poll(&mut self) -> OpStatus {
        if self.left > 0 {
            self.left -= 1;
            OpStatus::Pending
        } else {
            OpStatus::Succeed
        }
    }

    fn error(&self) -> Option<&str> {
        None
    }
}

struct TestSweepOperation {
    left: u32,
}

impl SweepOperation for TestSweepOperation {
    fn poll(&mut self) -> OpStatus {
        if self.left > 0 {
            self.left -= 1;
            OpStatus::Pending
        } else {
            OpStatus::Succeed
        }
    }
}

impl Store for TestStore {
    fn initialize(&self, _desc: &PackageDescriptor) -> Box<dyn InitOperation> {
        self.inner.inits_started.set(self.inner.inits_started.get() + 1);
        Box::new(TestInitOperation {
            store: self.clone(),
            left: self.inner.init_delay.get(),
            manifest: None,
            error: self.inner.init_error.borrow().clone(),
        })
    }

    fn query_version(&self, _desc: &PackageDescriptor) -> Box<dyn VersionOperation> {
        Box::new(TestVersionOperation {
            store: self.clone(),
            left: 0,
        })
    }

    fn load_asset(&self, info: &AssetInfo, _priority: u32) -> Box<dyn AssetOperation> {
        self.inner.loads_started.set(self.inner.loads_started.get() + 1);

        let assets = self.inner.assets.borrow();
        let scripted = assets.iter().find(|v| v.location == info.location);
        Box::new(TestAssetOperation {
            store: self.clone(),
            location: info.location.clone(),
            left: scripted.map(|v| v.delay).unwrap_or(0),
            missing: scripted.is_none(),
            asset: None,
            error: None,
        })
    }

    fn load_asset_sync(&self, info: &AssetInfo) -> Result<AssetObject> {
        let assets = self.inner.assets.borrow();
        let v = assets
            .iter()
            .find(|v| v.location == info.location)
            .ok_or_else(|| Error::NotExist(info.location.clone()))?;

        if v.fail {
            return Err(Error::LoadFailed {
                location: info.location.clone(),
                message: "scripted load failure".to_string(),
            });
        }

        Ok(AssetObject::new(
            self.issue(),
            v.kind,
            Box::new(v.bytes.clone()),
        ))
    }

    fn load_scene(
        &self,
        name: &str,
        _role: SceneRole,
        suspend_load: bool,
        _priority: u32,
    ) -> Box<dyn SceneOperation> {
        let known = self
            .inner
            .assets
            .borrow()
            .iter()
            .any(|v| v.location == name);

        let phase = if known {
            TestScenePhase::Working(self.inner.scene_delay.get())
        } else {
            TestScenePhase::Failed(format!("No such scene '{}'.", name))
        };

        Box::new(TestSceneOperation {
            store: self.clone(),
            suspend_load,
            phase,
        })
    }

    fn release_asset(&self, token: AssetToken) {
        self.inner.released.borrow_mut().push(token);
    }

    fn sweep_unused(&self) -> Box<dyn SweepOperation> {
        self.inner.sweeps_started.set(self.inner.sweeps_started.get() + 1);
        Box::new(TestSweepOperation {
            left: self.inner.sweep_delay.get(),
        })
    }

    fn destroy(&self) {
        self.inner.destroyed.set(true);
    }
}
