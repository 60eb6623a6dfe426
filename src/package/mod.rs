//! Named packages and their initialization state machine.
//!
//! A package is an independently initialized source of loadable content. Its
//! descriptor says where the content lives and how it is served; the
//! registry drives mode-specific initialization against the backing store
//! and afterwards answers location lookups from the manifest the store
//! produced.
//!
//! Initialization is deliberately re-entrant: a second `init_package` while
//! the first is still in flight does not start a second backing operation,
//! it just queues another completion callback. A failed initialization is
//! terminal for that attempt, the caller retries by calling `init_package`
//! again.

use std::path::PathBuf;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::errors::*;
use crate::manifest::Manifest;
use crate::store::{AssetInfo, OpStatus, Store};
use crate::utils::FastHashMap;

/// How a package serves its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayMode {
    /// Content is read straight from loose source files; the manifest is
    /// synthesized on the fly.
    EditorSimulate,
    /// Content was bundled at build time and ships with the application.
    OfflinePlay,
    /// Content is downloaded from a host server.
    HostPlay,
    /// Content is served by a web host, for platforms without a local
    /// read-write area.
    WebPlay,
}

/// How thoroughly downloaded files are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyLevel {
    Low,
    Middle,
    High,
}

/// Initialization state of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Startup-time description of a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageDescriptor {
    /// Unique package name.
    pub name: String,
    pub mode: PlayMode,
    pub verify_level: VerifyLevel,
    /// Per-tick budget in milliseconds for progressing asynchronous
    /// operations of this package.
    pub time_slice_ms: u64,
    /// Host server root, for `HostPlay`/`WebPlay` packages.
    pub host_url: String,
    /// Root of the bundled, read-only content area.
    pub read_only_path: PathBuf,
    /// Root of the writable cache area.
    pub read_write_path: PathBuf,
}

impl Default for PackageDescriptor {
    fn default() -> Self {
        PackageDescriptor {
            name: "DefaultPackage".to_string(),
            mode: PlayMode::OfflinePlay,
            verify_level: VerifyLevel::Middle,
            time_slice_ms: 30,
            host_url: String::new(),
            read_only_path: PathBuf::from("."),
            read_write_path: PathBuf::from("."),
        }
    }
}

pub type InitCallback = Box<dyn FnOnce(Result<()>)>;
pub type VersionCallback = Box<dyn FnOnce(Result<String>)>;

struct PendingInit {
    op: Box<dyn crate::store::InitOperation>,
    timeout: f32,
    elapsed: f32,
    waiters: SmallVec<[InitCallback; 2]>,
}

struct PendingVersion {
    op: Box<dyn crate::store::VersionOperation>,
    timeout: f32,
    elapsed: f32,
    waiters: SmallVec<[VersionCallback; 2]>,
}

struct Package {
    desc: PackageDescriptor,
    state: InitState,
    version: Option<String>,
    manifest: Option<Manifest>,
    index: FastHashMap<String, usize>,
    init: Option<PendingInit>,
    version_query: Option<PendingVersion>,
}

/// Owns the package descriptors and resolves symbolic locations against the
/// manifests of ready packages.
pub struct PackageRegistry {
    store: Rc<dyn Store>,
    packages: Vec<Package>,
    names: FastHashMap<String, usize>,
}

impl PackageRegistry {
    pub fn new(store: Rc<dyn Store>) -> Self {
        PackageRegistry {
            store,
            packages: Vec::new(),
            names: FastHashMap::default(),
        }
    }

    /// Creates a package from `desc`, or returns the existing descriptor
    /// with the same name. An existing package is never silently
    /// reconfigured.
    pub fn create_or_get(&mut self, desc: &PackageDescriptor) -> &PackageDescriptor {
        if let Some(&index) = self.names.get(&desc.name) {
            return &self.packages[index].desc;
        }

        info!("Creates package '{}' ({:?}).", desc.name, desc.mode);
        self.names.insert(desc.name.clone(), self.packages.len());
        self.packages.push(Package {
            desc: desc.clone(),
            state: InitState::Uninitialized,
            version: None,
            manifest: None,
            index: FastHashMap::default(),
            init: None,
            version_query: None,
        });

        &self.packages.last().unwrap().desc
    }

    pub fn descriptor(&self, name: &str) -> Option<&PackageDescriptor> {
        self.names.get(name).map(|&index| &self.packages[index].desc)
    }

    pub fn state(&self, name: &str) -> Option<InitState> {
        self.names.get(name).map(|&index| self.packages[index].state)
    }

    /// The version string recorded by the last successful `query_version`.
    pub fn version(&self, name: &str) -> Option<&str> {
        self.names
            .get(name)
            .and_then(|&index| self.packages[index].version.as_ref())
            .map(|v| v.as_str())
    }

    /// Starts (or joins) the initialization of package `name`. `callback`
    /// fires once the package reaches `Ready` or `Failed`; exceeding
    /// `timeout` seconds drives the attempt to `Failed`.
    pub fn init_package<F>(&mut self, name: &str, timeout: f32, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        let store = self.store.clone();
        let index = *self
            .names
            .get(name)
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))?;
        let pkg = &mut self.packages[index];

        match pkg.state {
            InitState::Ready => {
                callback(Ok(()));
            }
            InitState::Initializing => {
                let pending = pkg.init.as_mut().expect("in-flight initialization");
                pending.waiters.push(Box::new(callback));
            }
            InitState::Uninitialized | InitState::Failed => {
                info!("Initializes package '{}' ({:?}).", pkg.desc.name, pkg.desc.mode);
                let op = store.initialize(&pkg.desc);
                pkg.state = InitState::Initializing;

                let mut waiters = SmallVec::new();
                waiters.push(Box::new(callback) as InitCallback);
                pkg.init = Some(PendingInit {
                    op,
                    timeout,
                    elapsed: 0.0,
                    waiters,
                });
            }
        }

        Ok(())
    }

    /// Starts (or joins) a version query for package `name`, with the same
    /// timeout discipline as `init_package`.
    pub fn query_version<F>(&mut self, name: &str, timeout: f32, callback: F) -> Result<()>
    where
        F: FnOnce(Result<String>) + 'static,
    {
        let store = self.store.clone();
        let index = *self
            .names
            .get(name)
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))?;
        let pkg = &mut self.packages[index];

        if let Some(pending) = pkg.version_query.as_mut() {
            pending.waiters.push(Box::new(callback));
            return Ok(());
        }

        let op = store.query_version(&pkg.desc);
        let mut waiters = SmallVec::new();
        waiters.push(Box::new(callback) as VersionCallback);
        pkg.version_query = Some(PendingVersion {
            op,
            timeout,
            elapsed: 0.0,
            waiters,
        });

        Ok(())
    }

    /// Resolves a symbolic location against the manifests of ready
    /// packages. Pure lookup, no side effects.
    pub fn resolve(&self, location: &str) -> Option<AssetInfo> {
        for pkg in &self.packages {
            if pkg.state != InitState::Ready {
                continue;
            }

            if let Some(&item) = pkg.index.get(location) {
                let manifest = pkg.manifest.as_ref()?;
                let item = &manifest.items[item];
                return Some(AssetInfo {
                    location: item.location.clone(),
                    kind: item.kind.clone(),
                    uuid: item.uuid,
                });
            }
        }

        None
    }

    /// Checks if any ready package resolves `location`.
    #[inline]
    pub fn check_location_valid(&self, location: &str) -> bool {
        self.resolve(location).is_some()
    }

    /// Drives in-flight initializations and version queries. Completion
    /// callbacks fire after all bookkeeping of the tick is done.
    pub fn update(&mut self, dt: f32) {
        let mut inits: Vec<(String, SmallVec<[InitCallback; 2]>, Option<String>)> = Vec::new();
        let mut versions: Vec<(String, SmallVec<[VersionCallback; 2]>, ::std::result::Result<String, String>)> =
            Vec::new();

        for pkg in &mut self.packages {
            if let Some(mut pending) = pkg.init.take() {
                pending.elapsed += dt;
                match pending.op.poll() {
                    OpStatus::Pending => {
                        if pending.elapsed >= pending.timeout {
                            pkg.state = InitState::Failed;
                            let message =
                                format!("Initialization timed out after {:.1}s.", pending.timeout);
                            warn!("Package '{}': {}", pkg.desc.name, message);
                            inits.push((pkg.desc.name.clone(), pending.waiters, Some(message)));
                        } else {
                            pkg.init = Some(pending);
                        }
                    }
                    OpStatus::Succeed => {
                        let manifest = pending.op.take_manifest().unwrap_or_default();
                        pkg.index = manifest
                            .items
                            .iter()
                            .enumerate()
                            .map(|(i, v)| (v.location.clone(), i))
                            .collect();
                        pkg.manifest = Some(manifest);
                        pkg.state = InitState::Ready;
                        info!(
                            "Package '{}' is ready with {} assets.",
                            pkg.desc.name,
                            pkg.index.len()
                        );
                        inits.push((pkg.desc.name.clone(), pending.waiters, None));
                    }
                    OpStatus::Failed => {
                        pkg.state = InitState::Failed;
                        let message = pending.op.error().unwrap_or("unknown").to_string();
                        warn!(
                            "Package '{}' failed to initialize. {}",
                            pkg.desc.name, message
                        );
                        inits.push((pkg.desc.name.clone(), pending.waiters, Some(message)));
                    }
                }
            }

            if let Some(mut pending) = pkg.version_query.take() {
                pending.elapsed += dt;
                match pending.op.poll() {
                    OpStatus::Pending => {
                        if pending.elapsed >= pending.timeout {
                            let message =
                                format!("Version query timed out after {:.1}s.", pending.timeout);
                            versions.push((pkg.desc.name.clone(), pending.waiters, Err(message)));
                        } else {
                            pkg.version_query = Some(pending);
                        }
                    }
                    OpStatus::Succeed => {
                        let version = pending.op.take_version().unwrap_or_default();
                        pkg.version = Some(version.clone());
                        versions.push((pkg.desc.name.clone(), pending.waiters, Ok(version)));
                    }
                    OpStatus::Failed => {
                        let message = pending.op.error().unwrap_or("unknown").to_string();
                        versions.push((pkg.desc.name.clone(), pending.waiters, Err(message)));
                    }
                }
            }
        }

        for (package, waiters, failure) in inits {
            for callback in waiters {
                match failure {
                    None => callback(Ok(())),
                    Some(ref message) => callback(Err(Error::InitializationFailed {
                        package: package.clone(),
                        message: message.clone(),
                    })),
                }
            }
        }

        for (package, waiters, result) in versions {
            for callback in waiters {
                match result {
                    Ok(ref v) => callback(Ok(v.clone())),
                    Err(ref message) => callback(Err(Error::InitializationFailed {
                        package: package.clone(),
                        message: message.clone(),
                    })),
                }
            }
        }
    }

    /// Returns the number of packages, in any state.
    #[inline]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
