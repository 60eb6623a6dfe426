//! Local filesystem stores.
//!
//! `DirStore` serves offline-bundled packages: the package root carries a
//! `.MANIFEST` produced at build time, and assets are read from the paths it
//! names. `SimulateStore` skips the build step entirely and synthesizes a
//! manifest by walking the package root, which is how editor-simulated
//! packages behave.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use inlinable_string::InlinableString;
use uuid::Uuid;

use crate::errors::*;
use crate::manifest::{self, Manifest, ManifestItem};
use crate::package::{PackageDescriptor, PlayMode};
use crate::scene::SceneRole;
use crate::utils::FastHashMap;

use super::loaders::LoaderRegistry;
use super::{
    AssetInfo, AssetObject, AssetOperation, AssetToken, InitOperation, OpStatus, SceneOperation,
    Store, SweepOperation, TokenIssuer, UnloadOperation, VersionOperation,
};

struct IndexItem {
    path: PathBuf,
    kind: InlinableString,
}

struct FsInner {
    loaders: Rc<LoaderRegistry>,
    packages: RefCell<FastHashMap<String, FastHashMap<String, IndexItem>>>,
    tokens: TokenIssuer,
}

impl FsInner {
    fn new(loaders: Rc<LoaderRegistry>) -> Rc<Self> {
        Rc::new(FsInner {
            loaders,
            packages: RefCell::new(FastHashMap::default()),
            tokens: TokenIssuer::new(),
        })
    }

    fn attach(&self, package: &str, root: &Path, manifest: &Manifest) {
        let mut items = FastHashMap::default();
        for v in &manifest.items {
            items.insert(
                v.location.clone(),
                IndexItem {
                    path: root.join(&v.path),
                    kind: v.kind.clone(),
                },
            );
        }

        self.packages.borrow_mut().insert(package.to_string(), items);
    }

    fn locate(&self, location: &str) -> Option<(PathBuf, InlinableString)> {
        let packages = self.packages.borrow();
        for items in packages.values() {
            if let Some(v) = items.get(location) {
                return Some((v.path.clone(), v.kind.clone()));
            }
        }

        None
    }

    fn read(&self, location: &str) -> Result<AssetObject> {
        let (path, kind) = self
            .locate(location)
            .ok_or_else(|| Error::NotExist(location.to_string()))?;

        let bytes = fs::read(&path)?;
        let payload = self.loaders.decode(&kind, &bytes)?;
        Ok(AssetObject::new(self.tokens.issue(), kind, payload))
    }
}

fn load_manifest(root: &Path) -> Result<Manifest> {
    let mut file = fs::File::open(root.join(manifest::NAME))?;
    Manifest::load_from(&mut file)
}

fn scan_manifest(root: &Path, loaders: &LoaderRegistry) -> Result<Manifest> {
    let mut paths = Vec::new();
    scan_dir(root, &mut paths)?;
    paths.sort();

    let mut out = Manifest::new();
    for path in paths {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| Error::Malformed(format!("Path {:?} escapes package root.", path)))?;
        let relative = relative.to_string_lossy().replace('\\', "/");

        if let Some(kind) = loaders.kind_of(&relative) {
            out.items.push(ManifestItem {
                location: relative.clone(),
                path: relative,
                kind,
                uuid: Uuid::new_v4(),
            });
        }
    }

    Ok(out)
}

fn scan_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let hidden = path
            .file_name()
            .and_then(|v| v.to_str())
            .map(|v| v.starts_with('.'))
            .unwrap_or(false);
        if hidden {
            continue;
        }

        if path.is_dir() {
            scan_dir(&path, out)?;
        } else {
            out.push(path);
        }
    }

    Ok(())
}

enum InitPhase {
    Start,
    Done,
}

struct FsInitOperation {
    inner: Rc<FsInner>,
    package: String,
    root: PathBuf,
    simulate: bool,
    expected: PlayMode,
    actual: PlayMode,
    phase: InitPhase,
    manifest: Option<Manifest>,
    error: Option<String>,
}

impl InitOperation for FsInitOperation {
    fn poll(&mut self) -> OpStatus {
        if let InitPhase::Done = self.phase {
            return if self.error.is_some() {
                OpStatus::Failed
            } else {
                OpStatus::Succeed
            };
        }

        self.phase = InitPhase::Done;

        if self.actual != self.expected {
            self.error = Some(format!(
                "Package mode {:?} is not supported by this store.",
                self.actual
            ));
            return OpStatus::Failed;
        }

        let manifest = if self.simulate {
            scan_manifest(&self.root, &self.inner.loaders)
        } else {
            load_manifest(&self.root)
        };

        match manifest {
            Ok(v) => {
                self.inner.attach(&self.package, &self.root, &v);
                self.manifest = Some(v);
                OpStatus::Succeed
            }
            Err(err) => {
                self.error = Some(err.to_string());
                OpStatus::Failed
            }
        }
    }

    fn take_manifest(&mut self) -> Option<Manifest> {
        self.manifest.take()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|v| v.as_str())
    }
}

struct FsVersionOperation {
    root: PathBuf,
    polled: bool,
    version: Option<String>,
    error: Option<String>,
}

impl VersionOperation for FsVersionOperation {
    fn poll(&mut self) -> OpStatus {
        if !self.polled {
            self.polled = true;
            match fs::read_to_string(self.root.join(".VERSION")) {
                Ok(v) => self.version = Some(v.trim().to_string()),
                Err(err) => self.error = Some(format!("Could not read package version. {}", err)),
            }
        }

        if self.error.is_some() {
            OpStatus::Failed
        } else {
            OpStatus::Succeed
        }
    }

    fn take_version(&mut self) -> Option<String> {
        self.version.take()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|v| v.as_str())
    }
}

struct FsAssetOperation {
    inner: Rc<FsInner>,
    location: String,
    asset: Option<AssetObject>,
    error: Option<String>,
    polled: bool,
}

impl AssetOperation for FsAssetOperation {
    fn poll(&mut self) -> OpStatus {
        if !self.polled {
            self.polled = true;
            match self.inner.read(&self.location) {
                Ok(v) => self.asset = Some(v),
                Err(err) => self.error = Some(err.to_string()),
            }
        }

        if self.error.is_some() {
            OpStatus::Failed
        } else {
            OpStatus::Succeed
        }
    }

    fn progress(&self) -> f32 {
        if self.polled {
            1.0
        } else {
            0.0
        }
    }

    fn take_asset(&mut self) -> Option<AssetObject> {
        self.asset.take()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|v| v.as_str())
    }
}

enum ScenePhase {
    Reading,
    Suspended,
    Loaded,
    Failed(String),
}

struct FsSceneOperation {
    inner: Rc<FsInner>,
    name: String,
    suspend_load: bool,
    phase: ScenePhase,
}

impl SceneOperation for FsSceneOperation {
    fn poll(&mut self) -> OpStatus {
        if let ScenePhase::Reading = self.phase {
            self.phase = match self.inner.locate(&self.name) {
                Some((path, _)) => {
                    if path.exists() {
                        if self.suspend_load {
                            ScenePhase::Suspended
                        } else {
                            ScenePhase::Loaded
                        }
                    } else {
                        ScenePhase::Failed(format!("Scene file {:?} is missing.", path))
                    }
                }
                None => ScenePhase::Failed(format!("Could not find scene '{}'.", self.name)),
            };
        }

        match self.phase {
            ScenePhase::Loaded => OpStatus::Succeed,
            ScenePhase::Failed(_) => OpStatus::Failed,
            _ => OpStatus::Pending,
        }
    }

    fn progress(&self) -> f32 {
        match self.phase {
            ScenePhase::Reading => 0.0,
            ScenePhase::Suspended => 0.9,
            ScenePhase::Loaded => 1.0,
            ScenePhase::Failed(_) => 1.0,
        }
    }

    fn error(&self) -> Option<&str> {
        if let ScenePhase::Failed(ref v) = self.phase {
            Some(v)
        } else {
            None
        }
    }

    fn activate(&mut self) -> bool {
        match self.phase {
            ScenePhase::Loaded => true,
            _ => false,
        }
    }

    fn unsuspend(&mut self) -> bool {
        self.suspend_load = false;
        match self.phase {
            ScenePhase::Suspended => {
                self.phase = ScenePhase::Loaded;
                true
            }
            ScenePhase::Loaded => true,
            _ => false,
        }
    }

    fn unload(&mut self) -> Box<dyn UnloadOperation> {
        Box::new(FsUnloadOperation {})
    }
}

struct FsUnloadOperation {}

impl UnloadOperation for FsUnloadOperation {
    fn poll(&mut self) -> OpStatus {
        OpStatus::Succeed
    }

    fn error(&self) -> Option<&str> {
        None
    }
}

struct FsSweepOperation {}

impl SweepOperation for FsSweepOperation {
    fn poll(&mut self) -> OpStatus {
        OpStatus::Succeed
    }
}

macro_rules! impl_fs_store {
    ($name:ident, $mode:expr, $simulate:expr) => {
        impl $name {
            pub fn new(loaders: Rc<LoaderRegistry>) -> Self {
                $name {
                    inner: FsInner::new(loaders),
                }
            }
        }

        impl Store for $name {
            fn initialize(&self, desc: &PackageDescriptor) -> Box<dyn InitOperation> {
                Box::new(FsInitOperation {
                    inner: self.inner.clone(),
                    package: desc.name.clone(),
                    root: desc.read_only_path.clone(),
                    simulate: $simulate,
                    expected: $mode,
                    actual: desc.mode,
                    phase: InitPhase::Start,
                    manifest: None,
                    error: None,
                })
            }

            fn query_version(&self, desc: &PackageDescriptor) -> Box<dyn VersionOperation> {
                Box::new(FsVersionOperation {
                    root: desc.read_only_path.clone(),
                    polled: false,
                    version: None,
                    error: None,
                })
            }

            fn load_asset(&self, info: &AssetInfo, _priority: u32) -> Box<dyn AssetOperation> {
                Box::new(FsAssetOperation {
                    inner: self.inner.clone(),
                    location: info.location.clone(),
                    asset: None,
                    error: None,
                    polled: false,
                })
            }

            fn load_asset_sync(&self, info: &AssetInfo) -> Result<AssetObject> {
                self.inner.read(&info.location)
            }

            fn load_scene(
                &self,
                name: &str,
                _role: SceneRole,
                suspend_load: bool,
                _priority: u32,
            ) -> Box<dyn SceneOperation> {
                Box::new(FsSceneOperation {
                    inner: self.inner.clone(),
                    name: name.to_string(),
                    suspend_load,
                    phase: ScenePhase::Reading,
                })
            }

            fn release_asset(&self, token: AssetToken) {
                if !self.inner.tokens.release(token) {
                    warn!("Released an unknown asset token {:?}.", token);
                }
            }

            fn sweep_unused(&self) -> Box<dyn SweepOperation> {
                Box::new(FsSweepOperation {})
            }

            fn destroy(&self) {
                self.inner.packages.borrow_mut().clear();
                self.inner.tokens.clear();
            }
        }
    };
}

/// Serves offline-bundled packages from their build-time `.MANIFEST`.
pub struct DirStore {
    inner: Rc<FsInner>,
}

/// Serves editor-simulated packages by scanning the package root and
/// synthesizing a manifest from the loader registry's extension table.
pub struct SimulateStore {
    inner: Rc<FsInner>,
}

impl_fs_store!(DirStore, PlayMode::OfflinePlay, false);
impl_fs_store!(SimulateStore, PlayMode::EditorSimulate, true);
