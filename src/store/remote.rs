//! Host-served packages.
//!
//! `RemoteStore` serves host-play and web-play packages. All byte transfer
//! goes through the `Transport` seam; the store itself only decides what to
//! fetch and how to decode it. Retry and backoff policy belongs to the
//! transport, a failed fetch is surfaced as-is.
//!
//! The bundled `DirTransport` maps URLs onto a local directory. It stands in
//! for a real HTTP client in tests and demos, and doubles as a mirror-on-disk
//! transport for platforms where downloads are handled out of process.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use inlinable_string::InlinableString;

use crate::errors::*;
use crate::manifest::{self, Manifest};
use crate::package::{PackageDescriptor, PlayMode};
use crate::scene::SceneRole;
use crate::utils::FastHashMap;

use super::loaders::LoaderRegistry;
use super::{
    AssetInfo, AssetObject, AssetOperation, AssetToken, InitOperation, OpStatus, SceneOperation,
    Store, SweepOperation, TokenIssuer, UnloadOperation, VersionOperation,
};

/// An in-flight byte transfer.
pub trait Fetch {
    fn poll(&mut self) -> OpStatus;
    fn take_bytes(&mut self) -> Option<Vec<u8>>;
    fn error(&self) -> Option<&str>;
}

/// The byte-transfer seam of `RemoteStore`.
pub trait Transport {
    fn get(&self, url: &str) -> Box<dyn Fetch>;
}

/// A `Transport` that resolves the path component of every URL against a
/// local directory.
pub struct DirTransport {
    root: PathBuf,
}

impl DirTransport {
    pub fn new<T: Into<PathBuf>>(root: T) -> Self {
        DirTransport { root: root.into() }
    }
}

impl Transport for DirTransport {
    fn get(&self, url: &str) -> Box<dyn Fetch> {
        Box::new(DirFetch {
            path: self.root.join(url_path(url)),
            polled: false,
            bytes: None,
            error: None,
        })
    }
}

struct DirFetch {
    path: PathBuf,
    polled: bool,
    bytes: Option<Vec<u8>>,
    error: Option<String>,
}

impl Fetch for DirFetch {
    fn poll(&mut self) -> OpStatus {
        if !self.polled {
            self.polled = true;
            match fs::read(&self.path) {
                Ok(v) => self.bytes = Some(v),
                Err(err) => self.error = Some(format!("GET {:?} failed. {}", self.path, err)),
            }
        }

        if self.error.is_some() {
            OpStatus::Failed
        } else {
            OpStatus::Succeed
        }
    }

    fn take_bytes(&mut self) -> Option<Vec<u8>> {
        self.bytes.take()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|v| v.as_str())
    }
}

/// Extracts the path component of `url`, without a leading slash.
fn url_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(v) => &url[v + 3..],
        None => url,
    };

    match rest.find('/') {
        Some(v) => &rest[v + 1..],
        None => "",
    }
}

fn join_url(host: &str, path: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), path)
}

struct RemoteItem {
    url: String,
    kind: InlinableString,
}

struct RemoteInner {
    transport: Rc<dyn Transport>,
    loaders: Rc<LoaderRegistry>,
    packages: RefCell<FastHashMap<String, FastHashMap<String, RemoteItem>>>,
    tokens: TokenIssuer,
}

impl RemoteInner {
    fn attach(&self, package: &str, host: &str, manifest: &Manifest) {
        let mut items = FastHashMap::default();
        for v in &manifest.items {
            items.insert(
                v.location.clone(),
                RemoteItem {
                    url: join_url(host, &v.path),
                    kind: v.kind.clone(),
                },
            );
        }

        self.packages.borrow_mut().insert(package.to_string(), items);
    }

    fn locate(&self, location: &str) -> Option<(String, InlinableString)> {
        let packages = self.packages.borrow();
        for items in packages.values() {
            if let Some(v) = items.get(location) {
                return Some((v.url.clone(), v.kind.clone()));
            }
        }

        None
    }
}

/// Serves host-play and web-play packages through a `Transport`.
pub struct RemoteStore {
    inner: Rc<RemoteInner>,
}

impl RemoteStore {
    pub fn new(loaders: Rc<LoaderRegistry>, transport: Rc<dyn Transport>) -> Self {
        RemoteStore {
            inner: Rc::new(RemoteInner {
                transport,
                loaders,
                packages: RefCell::new(FastHashMap::default()),
                tokens: TokenIssuer::new(),
            }),
        }
    }
}

struct RemoteInitOperation {
    inner: Rc<RemoteInner>,
    package: String,
    host: String,
    fetch: Option<Box<dyn Fetch>>,
    manifest: Option<Manifest>,
    error: Option<String>,
}

impl InitOperation for RemoteInitOperation {
    fn poll(&mut self) -> OpStatus {
        if let Some(fetch) = self.fetch.as_mut() {
            match fetch.poll() {
                OpStatus::Pending => return OpStatus::Pending,
                OpStatus::Failed => {
                    self.error = Some(
                        fetch
                            .error()
                            .unwrap_or("Manifest download failed.")
                            .to_string(),
                    );
                }
                OpStatus::Succeed => {
                    let bytes = fetch.take_bytes().unwrap_or_default();
                    match Manifest::load_from(&mut &bytes[..]) {
                        Ok(v) => {
                            self.inner.attach(&self.package, &self.host, &v);
                            self.manifest = Some(v);
                        }
                        Err(err) => self.error = Some(err.to_string()),
                    }
                }
            }

            self.fetch = None;
        }

        if self.error.is_some() {
            OpStatus::Failed
        } else {
            OpStatus::Succeed
        }
    }

    fn take_manifest(&mut self) -> Option<Manifest> {
        self.manifest.take()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|v| v.as_str())
    }
}

struct RemoteVersionOperation {
    fetch: Box<dyn Fetch>,
    version: Option<String>,
    error: Option<String>,
    done: bool,
}

impl VersionOperation for RemoteVersionOperation {
    fn poll(&mut self) -> OpStatus {
        if !self.done {
            match self.fetch.poll() {
                OpStatus::Pending => return OpStatus::Pending,
                OpStatus::Failed => {
                    self.error = Some(
                        self.fetch
                            .error()
                            .unwrap_or("Version download failed.")
                            .to_string(),
                    );
                }
                OpStatus::Succeed => {
                    let bytes = self.fetch.take_bytes().unwrap_or_default();
                    match String::from_utf8(bytes) {
                        Ok(v) => self.version = Some(v.trim().to_string()),
                        Err(_) => self.error = Some("Version file is not UTF-8.".to_string()),
                    }
                }
            }

            self.done = true;
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

struct RemoteAssetOperation {
    inner: Rc<RemoteInner>,
    location: String,
    kind: InlinableString,
    fetch: Option<Box<dyn Fetch>>,
    asset: Option<AssetObject>,
    error: Option<String>,
}

impl RemoteAssetOperation {
    fn start(inner: &Rc<RemoteInner>, location: &str) -> Self {
        match inner.locate(location) {
            Some((url, kind)) => RemoteAssetOperation {
                inner: inner.clone(),
                location: location.to_string(),
                kind,
                fetch: Some(inner.transport.get(&url)),
                asset: None,
                error: None,
            },
            None => RemoteAssetOperation {
                inner: inner.clone(),
                location: location.to_string(),
                kind: InlinableString::from(""),
                fetch: None,
                asset: None,
                error: Some(format!("Could not find asset '{}'.", location)),
            },
        }
    }
}

impl AssetOperation for RemoteAssetOperation {
    fn poll(&mut self) -> OpStatus {
        if let Some(fetch) = self.fetch.as_mut() {
            match fetch.poll() {
                OpStatus::Pending => return OpStatus::Pending,
                OpStatus::Failed => {
                    self.error =
                        Some(fetch.error().unwrap_or("Download failed.").to_string());
                }
                OpStatus::Succeed => {
                    let bytes = fetch.take_bytes().unwrap_or_default();
                    match self.inner.loaders.decode(&self.kind, &bytes) {
                        Ok(payload) => {
                            self.asset = Some(AssetObject::new(
                                self.inner.tokens.issue(),
                                self.kind.clone(),
                                payload,
                            ));
                        }
                        Err(err) => {
                            self.error = Some(format!(
                                "Could not decode asset '{}'. {}",
                                self.location, err
                            ))
                        }
                    }
                }
            }

            self.fetch = None;
        }

        if self.error.is_some() {
            OpStatus::Failed
        } else {
            OpStatus::Succeed
        }
    }

    fn progress(&self) -> f32 {
        if self.fetch.is_some() {
            0.0
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

enum RemoteScenePhase {
    Fetching(Box<dyn Fetch>),
    Suspended,
    Loaded,
    Failed(String),
}

struct RemoteSceneOperation {
    suspend_load: bool,
    phase: RemoteScenePhase,
}

impl SceneOperation for RemoteSceneOperation {
    fn poll(&mut self) -> OpStatus {
        if let RemoteScenePhase::Fetching(ref mut fetch) = self.phase {
            self.phase = match fetch.poll() {
                OpStatus::Pending => return OpStatus::Pending,
                OpStatus::Failed => RemoteScenePhase::Failed(
                    fetch
                        .error()
                        .unwrap_or("Scene download failed.")
                        .to_string(),
                ),
                OpStatus::Succeed => {
                    if self.suspend_load {
                        RemoteScenePhase::Suspended
                    } else {
                        RemoteScenePhase::Loaded
                    }
                }
            };
        }

        match self.phase {
            RemoteScenePhase::Loaded => OpStatus::Succeed,
            RemoteScenePhase::Failed(_) => OpStatus::Failed,
            _ => OpStatus::Pending,
        }
    }

    fn progress(&self) -> f32 {
        match self.phase {
            RemoteScenePhase::Fetching(_) => 0.0,
            RemoteScenePhase::Suspended => 0.9,
            _ => 1.0,
        }
    }

    fn error(&self) -> Option<&str> {
        if let RemoteScenePhase::Failed(ref v) = self.phase {
            Some(v)
        } else {
            None
        }
    }

    fn activate(&mut self) -> bool {
        match self.phase {
            RemoteScenePhase::Loaded => true,
            _ => false,
        }
    }

    fn unsuspend(&mut self) -> bool {
        self.suspend_load = false;
        match self.phase {
            RemoteScenePhase::Suspended => {
                self.phase = RemoteScenePhase::Loaded;
                true
            }
            RemoteScenePhase::Loaded => true,
            _ => false,
        }
    }

    fn unload(&mut self) -> Box<dyn UnloadOperation> {
        Box::new(RemoteUnloadOperation {})
    }
}

struct RemoteUnloadOperation {}

impl UnloadOperation for RemoteUnloadOperation {
    fn poll(&mut self) -> OpStatus {
        OpStatus::Succeed
    }

    fn error(&self) -> Option<&str> {
        None
    }
}

struct RemoteSweepOperation {}

impl SweepOperation for RemoteSweepOperation {
    fn poll(&mut self) -> OpStatus {
        OpStatus::Succeed
    }
}

impl Store for RemoteStore {
    fn initialize(&self, desc: &PackageDescriptor) -> Box<dyn InitOperation> {
        let supported = desc.mode == PlayMode::HostPlay || desc.mode == PlayMode::WebPlay;
        if !supported {
            return Box::new(RemoteInitOperation {
                inner: self.inner.clone(),
                package: desc.name.clone(),
                host: desc.host_url.clone(),
                fetch: None,
                manifest: None,
                error: Some(format!(
                    "Package mode {:?} is not supported by this store.",
                    desc.mode
                )),
            });
        }

        let url = join_url(&desc.host_url, manifest::NAME);
        Box::new(RemoteInitOperation {
            inner: self.inner.clone(),
            package: desc.name.clone(),
            host: desc.host_url.clone(),
            fetch: Some(self.inner.transport.get(&url)),
            manifest: None,
            error: None,
        })
    }

    fn query_version(&self, desc: &PackageDescriptor) -> Box<dyn VersionOperation> {
        let url = join_url(&desc.host_url, ".VERSION");
        Box::new(RemoteVersionOperation {
            fetch: self.inner.transport.get(&url),
            version: None,
            error: None,
            done: false,
        })
    }

    fn load_asset(&self, info: &AssetInfo, _priority: u32) -> Box<dyn AssetOperation> {
        Box::new(RemoteAssetOperation::start(&self.inner, &info.location))
    }

    fn load_asset_sync(&self, info: &AssetInfo) -> Result<AssetObject> {
        let mut op = RemoteAssetOperation::start(&self.inner, &info.location);

        // Correct only for transports that complete in place; a truly
        // asynchronous transport must be driven through `load_asset`.
        while let OpStatus::Pending = op.poll() {}

        op.take_asset().ok_or_else(|| Error::LoadFailed {
            location: info.location.clone(),
            message: op.error().unwrap_or("unknown").to_string(),
        })
    }

    fn load_scene(
        &self,
        name: &str,
        _role: SceneRole,
        suspend_load: bool,
        _priority: u32,
    ) -> Box<dyn SceneOperation> {
        let phase = match self.inner.locate(name) {
            Some((url, _)) => RemoteScenePhase::Fetching(self.inner.transport.get(&url)),
            None => RemoteScenePhase::Failed(format!("Could not find scene '{}'.", name)),
        };

        Box::new(RemoteSceneOperation {
            suspend_load,
            phase,
        })
    }

    fn release_asset(&self, token: AssetToken) {
        if !self.inner.tokens.release(token) {
            warn!("Released an unknown asset token {:?}.", token);
        }
    }

    fn sweep_unused(&self) -> Box<dyn SweepOperation> {
        Box::new(RemoteSweepOperation {})
    }

    fn destroy(&self) {
        self.inner.packages.borrow_mut().clear();
        self.inner.tokens.clear();
    }
}
