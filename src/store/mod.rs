//! The backing-store seam.
//!
//! A `Store` is whatever actually owns bytes and scene instances: a bundled
//! directory on disk, a simulated package built straight from loose source
//! files, or a remote host reached through a `Transport`. The lifecycle
//! engine never blocks on it; every request hands back an operation object
//! that the engine polls once per tick until it reaches a terminal status.
//!
//! Operations are plain state machines. `poll` is required to be cheap, and
//! a store that performs I/O on its own worker threads only ever publishes
//! the outcome through the operation's next `poll`; the engine observes
//! nothing in between.

pub mod fs;
pub mod loaders;
pub mod remote;

pub use self::fs::{DirStore, SimulateStore};
pub use self::loaders::LoaderRegistry;
pub use self::remote::{DirTransport, RemoteStore, Transport};

use std::any::Any;

use inlinable_string::InlinableString;
use uuid::Uuid;

use crate::errors::*;
use crate::manifest::Manifest;
use crate::package::PackageDescriptor;
use crate::scene::SceneRole;

/// Status of an asynchronous store operation. `Pending` is only ever seen
/// by the polling loop; callers observe terminal statuses through their
/// callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Pending,
    Succeed,
    Failed,
}

impl OpStatus {
    #[inline]
    pub fn is_done(self) -> bool {
        self != OpStatus::Pending
    }
}

/// Identity of a loaded object inside its store. Tokens are never reused
/// within the lifetime of a store, so a released token can not alias a live
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetToken(pub u64);

/// A resolved asset descriptor. Produced by a registry lookup, consumed by
/// the load entry points; never persisted.
#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub location: String,
    pub kind: InlinableString,
    pub uuid: Uuid,
}

/// A loaded asset, as handed over by a store: the token naming it inside
/// the store plus the decoded payload.
pub struct AssetObject {
    token: AssetToken,
    kind: InlinableString,
    payload: Box<dyn Any>,
}

impl AssetObject {
    pub fn new<T: Into<InlinableString>>(token: AssetToken, kind: T, payload: Box<dyn Any>) -> Self {
        AssetObject {
            token,
            kind: kind.into(),
            payload,
        }
    }

    #[inline]
    pub fn token(&self) -> AssetToken {
        self.token
    }

    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the payload if it is of type `T`.
    #[inline]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

/// Package initialization. Yields the package manifest on success.
pub trait InitOperation {
    fn poll(&mut self) -> OpStatus;
    fn take_manifest(&mut self) -> Option<Manifest>;
    fn error(&self) -> Option<&str>;
}

/// Remote version query. Yields the package version string on success.
pub trait VersionOperation {
    fn poll(&mut self) -> OpStatus;
    fn take_version(&mut self) -> Option<String>;
    fn error(&self) -> Option<&str>;
}

/// An in-flight asset load.
pub trait AssetOperation {
    fn poll(&mut self) -> OpStatus;
    fn progress(&self) -> f32;
    fn take_asset(&mut self) -> Option<AssetObject>;
    fn error(&self) -> Option<&str>;
}

/// An in-flight scene load. The operation stays alive for as long as the
/// scene is tracked; activation and suspension are routed through it, and
/// unloading spawns a follow-up operation from it.
pub trait SceneOperation {
    fn poll(&mut self) -> OpStatus;
    fn progress(&self) -> f32;
    fn error(&self) -> Option<&str>;

    /// Promotes the loaded scene to the store's active rendering/lighting
    /// context. Returns false if the scene is not in a state that could be
    /// activated.
    fn activate(&mut self) -> bool;

    /// Releases a load that was started with `suspend_load`. Returns false
    /// if there is nothing to release.
    fn unsuspend(&mut self) -> bool;

    /// Starts unloading the loaded scene.
    fn unload(&mut self) -> Box<dyn UnloadOperation>;
}

/// An in-flight scene unload.
pub trait UnloadOperation {
    fn poll(&mut self) -> OpStatus;
    fn error(&self) -> Option<&str>;
}

/// A store-side pass over assets that are no longer referenced.
pub trait SweepOperation {
    fn poll(&mut self) -> OpStatus;
}

/// Issues store-unique asset tokens and keeps track of which ones are still
/// outstanding.
pub(crate) struct TokenIssuer {
    next: ::std::cell::Cell<u64>,
    live: ::std::cell::RefCell<crate::utils::FastHashSet<u64>>,
}

impl TokenIssuer {
    pub fn new() -> Self {
        TokenIssuer {
            next: ::std::cell::Cell::new(1),
            live: ::std::cell::RefCell::new(crate::utils::FastHashSet::default()),
        }
    }

    pub fn issue(&self) -> AssetToken {
        let v = self.next.get();
        self.next.set(v + 1);
        self.live.borrow_mut().insert(v);
        AssetToken(v)
    }

    /// Returns false if the token was not outstanding.
    pub fn release(&self, token: AssetToken) -> bool {
        self.live.borrow_mut().remove(&token.0)
    }

    pub fn clear(&self) {
        self.live.borrow_mut().clear();
    }
}

/// The contract a backing store fulfils towards the lifecycle engine.
///
/// Implementations are free to use interior mutability; the engine calls
/// into the store from a single logic thread only.
pub trait Store {
    /// Starts mode-specific initialization of `desc`, producing the package
    /// manifest.
    fn initialize(&self, desc: &PackageDescriptor) -> Box<dyn InitOperation>;

    /// Starts a version query for `desc`.
    fn query_version(&self, desc: &PackageDescriptor) -> Box<dyn VersionOperation>;

    /// Starts loading the asset described by `info`. `priority` is a hint;
    /// local stores ignore it.
    fn load_asset(&self, info: &AssetInfo, priority: u32) -> Box<dyn AssetOperation>;

    /// Loads the asset described by `info` before returning.
    fn load_asset_sync(&self, info: &AssetInfo) -> Result<AssetObject>;

    /// Starts loading a scene.
    fn load_scene(
        &self,
        name: &str,
        role: SceneRole,
        suspend_load: bool,
        priority: u32,
    ) -> Box<dyn SceneOperation>;

    /// Releases a loaded asset. Called exactly once per token, when the
    /// pooled handle wrapping it is swept.
    fn release_asset(&self, token: AssetToken);

    /// Starts a store-side pass over unreferenced assets.
    fn sweep_unused(&self) -> Box<dyn SweepOperation>;

    /// Tears the store down. No operation may be started afterwards.
    fn destroy(&self);
}
