//! Scene lifecycle management.
//!
//! Scenes come in two roles. The *main* scene is a singleton slot: loading
//! a main scene supersedes the previous one, and at most one main-role
//! record is ever tracked. *Sub* scenes load additively into a name-keyed
//! map, each with its own independent lifecycle.
//!
//! Per name, the state machine is strict:
//!
//! ```sh
//! NotLoaded -> Loading -> Loaded -> Unloading -> NotLoaded
//!                  \-> NotLoaded            (load failure)
//! ```
//!
//! A second load of a name that is anywhere in that cycle is rejected, not
//! queued. Accepting a main-scene load first forces an unconditional
//! unused-asset sweep, reclaiming memory before the swap.

use std::rc::Rc;

use crate::errors::*;
use crate::res::ResourceManager;
use crate::store::{OpStatus, SceneOperation, Store, UnloadOperation};
use crate::utils::FastHashMap;

/// Role of a tracked scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneRole {
    /// The exclusive primary scene slot.
    Main,
    /// An additively loaded secondary scene.
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SceneState {
    Loading,
    Loaded,
    Unloading,
}

/// Parameters of a scene load.
#[derive(Debug, Clone, Copy)]
pub struct LoadSceneParams {
    pub role: SceneRole,
    /// Holds the scene just before activation until `unsuspend` releases
    /// it.
    pub suspend_load: bool,
    pub priority: u32,
    /// Runs the GC hint after the pre-swap sweep of a main-scene load.
    pub gc_collect: bool,
}

impl Default for LoadSceneParams {
    fn default() -> Self {
        LoadSceneParams {
            role: SceneRole::Main,
            suspend_load: false,
            priority: 100,
            gc_collect: false,
        }
    }
}

/// Callbacks of a scene load. All of them are optional; progress is
/// reported once per tick while the backing operation is in flight.
#[derive(Default)]
pub struct LoadSceneCallbacks {
    success: Option<Box<dyn FnOnce(&str, f32)>>,
    update: Option<Box<dyn FnMut(&str, f32)>>,
    failure: Option<Box<dyn FnOnce(&str, &str)>>,
}

impl LoadSceneCallbacks {
    pub fn new() -> Self {
        Default::default()
    }

    /// Invoked as `(name, duration_seconds)` once the scene is loaded.
    pub fn on_success<F: FnOnce(&str, f32) + 'static>(mut self, callback: F) -> Self {
        self.success = Some(Box::new(callback));
        self
    }

    /// Invoked as `(name, progress)` every tick while loading.
    pub fn on_update<F: FnMut(&str, f32) + 'static>(mut self, callback: F) -> Self {
        self.update = Some(Box::new(callback));
        self
    }

    /// Invoked as `(name, message)` if the backing operation fails.
    pub fn on_failure<F: FnOnce(&str, &str) + 'static>(mut self, callback: F) -> Self {
        self.failure = Some(Box::new(callback));
        self
    }
}

/// Callbacks of a scene unload.
#[derive(Default)]
pub struct UnloadSceneCallbacks {
    success: Option<Box<dyn FnOnce(&str)>>,
    failure: Option<Box<dyn FnOnce(&str)>>,
}

impl UnloadSceneCallbacks {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn on_success<F: FnOnce(&str) + 'static>(mut self, callback: F) -> Self {
        self.success = Some(Box::new(callback));
        self
    }

    pub fn on_failure<F: FnOnce(&str) + 'static>(mut self, callback: F) -> Self {
        self.failure = Some(Box::new(callback));
        self
    }
}

struct SceneRecord {
    name: String,
    role: SceneRole,
    state: SceneState,
    suspended: bool,
    activation_order: u64,
    started_at: f64,
    op: Box<dyn SceneOperation>,
    unload_op: Option<Box<dyn UnloadOperation>>,
    on_success: Option<Box<dyn FnOnce(&str, f32)>>,
    on_update: Option<Box<dyn FnMut(&str, f32)>>,
    on_failure: Option<Box<dyn FnOnce(&str, &str)>>,
    on_unload_success: Option<Box<dyn FnOnce(&str)>>,
    on_unload_failure: Option<Box<dyn FnOnce(&str)>>,
}

/// Tracks the main scene and the additive sub-scenes, and drives their
/// load/unload operations once per tick.
pub struct SceneLifecycleManager {
    store: Rc<dyn Store>,
    main: Option<SceneRecord>,
    subs: FastHashMap<String, SceneRecord>,
    activation_stamp: u64,
    clock: f64,
}

impl SceneLifecycleManager {
    pub fn new(store: Rc<dyn Store>) -> Self {
        SceneLifecycleManager {
            store,
            main: None,
            subs: FastHashMap::default(),
            activation_stamp: 0,
            clock: 0.0,
        }
    }

    /// Starts loading a scene.
    ///
    /// A name that is currently loading, loaded or unloading is rejected
    /// with a state-conflict error. A main-role load while another main
    /// scene is still *loading* is rejected non-fatally: a warning is
    /// logged and nothing changes; the caller waits and retries. A main
    /// load accepted while another main scene is *loaded* supersedes it.
    pub fn load_scene(
        &mut self,
        res: &mut ResourceManager,
        name: &str,
        params: LoadSceneParams,
        callbacks: LoadSceneCallbacks,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("Scene asset name"));
        }

        match self.state_of(name) {
            Some(SceneState::Unloading) => return Err(Error::AlreadyUnloading(name.to_string())),
            Some(SceneState::Loading) => return Err(Error::AlreadyLoading(name.to_string())),
            Some(SceneState::Loaded) => return Err(Error::AlreadyLoaded(name.to_string())),
            None => {}
        }

        if params.role == SceneRole::Main {
            if let Some(main) = self.main.as_ref() {
                if main.state == SceneState::Loading {
                    warn!(
                        "Could not load main scene '{}' while '{}' is still loading.",
                        name, main.name
                    );
                    return Ok(());
                }
            }
        }

        info!("Loads scene '{}' ({:?}).", name, params.role);

        if params.role == SceneRole::Main {
            // Reclaim as much as possible before the swap.
            res.force_unload_all_assets(params.gc_collect);
        }

        let record = SceneRecord {
            name: name.to_string(),
            role: params.role,
            state: SceneState::Loading,
            suspended: params.suspend_load,
            activation_order: 0,
            started_at: self.clock,
            op: self
                .store
                .load_scene(name, params.role, params.suspend_load, params.priority),
            unload_op: None,
            on_success: callbacks.success,
            on_update: callbacks.update,
            on_failure: callbacks.failure,
            on_unload_success: None,
            on_unload_failure: None,
        };

        match params.role {
            SceneRole::Main => {
                if let Some(old) = self.main.replace(record) {
                    info!("Main scene '{}' is superseded.", old.name);
                }
            }
            SceneRole::Sub => {
                self.subs.insert(name.to_string(), record);
            }
        }

        Ok(())
    }

    /// Starts unloading a loaded scene.
    ///
    /// Rejects names that are not loaded, still loading, or already
    /// unloading. The main scene is the deliberate exception: it is never
    /// torn down through this path, its slot is simply superseded by the
    /// next main-scene load.
    pub fn unload_scene(&mut self, name: &str, callbacks: UnloadSceneCallbacks) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("Scene asset name"));
        }

        match self.state_of(name) {
            None => return Err(Error::NotLoaded(name.to_string())),
            Some(SceneState::Unloading) => return Err(Error::AlreadyUnloading(name.to_string())),
            Some(SceneState::Loading) => return Err(Error::AlreadyLoading(name.to_string())),
            Some(SceneState::Loaded) => {}
        }

        if self.is_main_scene(name) {
            warn!(
                "Main scene '{}' is not unloaded explicitly; the slot is superseded by the next main-scene load.",
                name
            );
            return Ok(());
        }

        info!("Unloads scene '{}'.", name);

        let record = self.subs.get_mut(name).expect("tracked sub-scene");
        record.state = SceneState::Unloading;
        record.unload_op = Some(record.op.unload());
        record.on_unload_success = callbacks.success;
        record.on_unload_failure = callbacks.failure;
        Ok(())
    }

    /// Switches which loaded scene is the active one. Returns false and
    /// logs a warning if `name` is not loaded; the previously active scene
    /// stays active.
    pub fn activate_scene(&mut self, name: &str) -> bool {
        let stamp = self.activation_stamp + 1;

        let activated = match self.record_mut(name) {
            Some(record) if record.state == SceneState::Loaded => {
                if record.op.activate() {
                    record.activation_order = stamp;
                    true
                } else {
                    false
                }
            }
            _ => false,
        };

        if activated {
            self.activation_stamp = stamp;
        } else {
            warn!("Activate scene invalid location: '{}'.", name);
        }

        activated
    }

    /// Releases a scene that was loaded with `suspend_load`. Returns false
    /// and logs a warning if `name` is not tracked or has nothing to
    /// release.
    pub fn unsuspend(&mut self, name: &str) -> bool {
        let released = match self.record_mut(name) {
            Some(record) => {
                let v = record.op.unsuspend();
                if v {
                    record.suspended = false;
                }
                v
            }
            None => false,
        };

        if !released {
            warn!("UnSuspend invalid location: '{}'.", name);
        }

        released
    }

    /// Checks if `name` occupies the main-scene slot.
    pub fn is_main_scene(&self, name: &str) -> bool {
        if let Some(main) = self.main.as_ref() {
            if main.name == name {
                return true;
            }
        }

        if !self.subs.contains_key(name) {
            warn!("IsMainScene invalid location: '{}'.", name);
        }

        false
    }

    /// Checks if the scene asset exists in any ready package.
    pub fn has_scene(
        &self,
        res: &ResourceManager,
        packages: &crate::package::PackageRegistry,
        name: &str,
    ) -> Result<bool> {
        Ok(res.has_asset(packages, name)? != crate::res::HasAssetResult::NotExist)
    }

    pub fn scene_is_loaded(&self, name: &str) -> bool {
        self.state_of(name) == Some(SceneState::Loaded)
    }

    pub fn scene_is_loading(&self, name: &str) -> bool {
        self.state_of(name) == Some(SceneState::Loading)
    }

    pub fn scene_is_unloading(&self, name: &str) -> bool {
        self.state_of(name) == Some(SceneState::Unloading)
    }

    pub fn loaded_scene_names(&self) -> Vec<String> {
        self.names_in(SceneState::Loaded)
    }

    pub fn loading_scene_names(&self) -> Vec<String> {
        self.names_in(SceneState::Loading)
    }

    pub fn unloading_scene_names(&self) -> Vec<String> {
        self.names_in(SceneState::Unloading)
    }

    /// Name of the loaded scene with the most recent activation, if any.
    pub fn active_scene(&self) -> Option<&str> {
        self.records()
            .filter(|v| v.state == SceneState::Loaded && v.activation_order > 0)
            .max_by_key(|v| v.activation_order)
            .map(|v| v.name.as_str())
    }

    /// Drives in-flight scene operations. Progress callbacks fire once per
    /// tick; completion callbacks fire after all record bookkeeping of the
    /// tick is done.
    pub fn update(&mut self, dt: f32) {
        self.clock += f64::from(dt);

        let mut loaded = Vec::new();
        let mut load_failed = Vec::new();
        let mut unloaded = Vec::new();
        let mut unload_failed = Vec::new();

        {
            let mut visit = |record: &mut SceneRecord| match record.state {
                SceneState::Loading => match record.op.poll() {
                    OpStatus::Pending => {
                        if let Some(update) = record.on_update.as_mut() {
                            update(&record.name, record.op.progress());
                        }
                    }
                    OpStatus::Succeed => loaded.push(record.name.clone()),
                    OpStatus::Failed => load_failed.push((
                        record.name.clone(),
                        record.op.error().unwrap_or("unknown").to_string(),
                    )),
                },
                SceneState::Unloading => {
                    if let Some(op) = record.unload_op.as_mut() {
                        match op.poll() {
                            OpStatus::Pending => {}
                            OpStatus::Succeed => unloaded.push(record.name.clone()),
                            OpStatus::Failed => unload_failed.push(record.name.clone()),
                        }
                    }
                }
                SceneState::Loaded => {}
            };

            if let Some(record) = self.main.as_mut() {
                visit(record);
            }
            for record in self.subs.values_mut() {
                visit(record);
            }
        }

        let mut dispatch: Vec<Box<dyn FnOnce()>> = Vec::new();

        for name in loaded {
            let clock = self.clock;
            let stamp = self.activation_stamp + 1;
            let mut activated = false;

            if let Some(record) = self.record_mut(&name) {
                record.state = SceneState::Loaded;
                if !record.suspended {
                    record.activation_order = stamp;
                    activated = true;
                }

                let duration = (clock - record.started_at) as f32;
                info!(
                    "Scene '{}' ({:?}) is loaded ({:.3}s).",
                    name, record.role, duration
                );

                if let Some(success) = record.on_success.take() {
                    dispatch.push(Box::new(move || success(&name, duration)));
                }
            }

            if activated {
                self.activation_stamp = stamp;
            }
        }

        for (name, message) in load_failed {
            let record = self.remove(&name);
            let message = format!(
                "Load scene failure, scene asset name '{}', error message '{}'.",
                name, message
            );
            warn!("{}", message);

            if let Some(failure) = record.and_then(|v| v.on_failure) {
                dispatch.push(Box::new(move || failure(&name, &message)));
            }
        }

        for name in unloaded {
            if let Some(record) = self.subs.remove(&name) {
                info!("Scene '{}' is unloaded.", name);
                if let Some(success) = record.on_unload_success {
                    dispatch.push(Box::new(move || success(&name)));
                }
            }
        }

        for name in unload_failed {
            if let Some(record) = self.subs.get_mut(&name) {
                record.state = SceneState::Loaded;
                record.unload_op = None;
                warn!("Unload scene failure, scene asset name '{}'.", name);
                if let Some(failure) = record.on_unload_failure.take() {
                    dispatch.push(Box::new(move || failure(&name)));
                }
            }
        }

        for callback in dispatch {
            callback();
        }
    }

    /// Drops every tracked record. Backing operations are released by
    /// dropping them; nothing is polled afterwards.
    pub(crate) fn shutdown(&mut self) {
        if self.main.is_some() || !self.subs.is_empty() {
            info!("Shuts down scene lifecycle manager.");
        }

        self.main = None;
        self.subs.clear();
    }

    fn state_of(&self, name: &str) -> Option<SceneState> {
        if let Some(main) = self.main.as_ref() {
            if main.name == name {
                return Some(main.state);
            }
        }

        self.subs.get(name).map(|v| v.state)
    }

    fn record_mut(&mut self, name: &str) -> Option<&mut SceneRecord> {
        let is_main = self.main.as_ref().map(|v| v.name == name).unwrap_or(false);
        if is_main {
            self.main.as_mut()
        } else {
            self.subs.get_mut(name)
        }
    }

    fn records<'a>(&'a self) -> impl Iterator<Item = &'a SceneRecord> + 'a {
        self.main.iter().chain(self.subs.values())
    }

    fn names_in(&self, state: SceneState) -> Vec<String> {
        let mut names: Vec<_> = self
            .records()
            .filter(|v| v.state == state)
            .map(|v| v.name.clone())
            .collect();
        names.sort();
        names
    }

    fn remove(&mut self, name: &str) -> Option<SceneRecord> {
        if let Some(main) = self.main.as_ref() {
            if main.name == name {
                return self.main.take();
            }
        }

        self.subs.remove(name)
    }
}
