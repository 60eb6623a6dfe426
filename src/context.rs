//! The explicit composition root.
//!
//! There are no ambient singletons anywhere in this crate. A `Context` is
//! constructed once, from a backing store and startup settings, and holds
//! the package registry, the resource manager and the scene lifecycle
//! manager; call sites that need a component receive it from here. The
//! host drives the whole engine by calling `update` once per frame from a
//! single logic thread.
//!
//! The convenience methods on `Context` only thread the components into
//! each other (location resolution for loads, the forced pre-swap sweep
//! for main-scene loads); all behavior lives in the components themselves.

use std::io::Read;
use std::rc::Rc;

use crate::errors::*;
use crate::package::{PackageDescriptor, PackageRegistry};
use crate::res::{
    AssetHandle, HasAssetResult, LoadAssetCallbacks, ResourceManager, ResourceParams,
};
use crate::scene::{
    LoadSceneCallbacks, LoadSceneParams, SceneLifecycleManager, UnloadSceneCallbacks,
};
use crate::store::Store;

/// Startup configuration. Read-only input, typically deserialized from a
/// JSON file next to the executable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub packages: Vec<PackageDescriptor>,
    pub resources: ResourceParams,
}

impl Settings {
    pub fn load_from(file: &mut dyn Read) -> Result<Settings> {
        Ok(serde_json::from_reader(file)?)
    }
}

/// Owns the lifecycle components and ties them together.
pub struct Context {
    store: Rc<dyn Store>,
    pub packages: PackageRegistry,
    pub resources: ResourceManager,
    pub scenes: SceneLifecycleManager,
    alive: bool,
}

impl Context {
    pub fn new(store: Rc<dyn Store>, settings: Settings) -> Self {
        let mut packages = PackageRegistry::new(store.clone());
        let mut resources = ResourceManager::new(store.clone(), settings.resources.clone());
        let scenes = SceneLifecycleManager::new(store.clone());

        for desc in &settings.packages {
            packages.create_or_get(desc);
        }

        // The polling budget follows the default package, the first one in
        // the settings.
        if let Some(first) = settings.packages.first() {
            resources.set_time_slice_ms(first.time_slice_ms);
        }

        Context {
            store,
            packages,
            resources,
            scenes,
            alive: true,
        }
    }

    /// Advances the engine one tick. `dt` is the elapsed time of the frame
    /// in seconds.
    pub fn update(&mut self, dt: f32) {
        self.packages.update(dt);
        self.resources.update(dt);
        self.scenes.update(dt);
    }

    pub fn create_or_get_package(&mut self, desc: &PackageDescriptor) -> &PackageDescriptor {
        self.packages.create_or_get(desc)
    }

    pub fn init_package<F>(&mut self, name: &str, timeout: f32, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        self.packages.init_package(name, timeout, callback)
    }

    pub fn load_asset_sync(&mut self, location: &str, kind: &str) -> Result<AssetHandle> {
        self.resources.load_asset_sync(&self.packages, location, kind)
    }

    pub fn load_asset_async(
        &mut self,
        location: &str,
        kind: &str,
        priority: u32,
        callbacks: LoadAssetCallbacks,
    ) -> Result<()> {
        self.resources
            .load_asset_async(&self.packages, location, kind, priority, callbacks)
    }

    pub fn has_asset(&self, location: &str) -> Result<HasAssetResult> {
        self.resources.has_asset(&self.packages, location)
    }

    pub fn load_scene(
        &mut self,
        name: &str,
        params: LoadSceneParams,
        callbacks: LoadSceneCallbacks,
    ) -> Result<()> {
        self.scenes
            .load_scene(&mut self.resources, name, params, callbacks)
    }

    pub fn unload_scene(&mut self, name: &str, callbacks: UnloadSceneCallbacks) -> Result<()> {
        self.scenes.unload_scene(name, callbacks)
    }

    /// Unloads tracked scenes, force-sweeps the handle pool and tears the
    /// backing store down. Runs at most once; dropping the context calls it
    /// implicitly.
    pub fn shutdown(&mut self) {
        if !self.alive {
            return;
        }

        self.alive = false;
        info!("Shuts down.");

        self.scenes.shutdown();
        for token in self.resources.pool_mut().drain() {
            self.store.release_asset(token);
        }
        self.store.destroy();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}
