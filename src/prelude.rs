pub use crate::context::{Context, Settings};
pub use crate::errors::{Error, Result};
pub use crate::manifest::{Manifest, ManifestItem};
pub use crate::package::{
    InitState, PackageDescriptor, PackageRegistry, PlayMode, VerifyLevel,
};
pub use crate::res::{
    AssetHandle, AssetHandlePool, HandleState, HasAssetResult, LoadAssetCallbacks,
    LoadResourceStatus, PoolParams, ResourceManager, ResourceParams, TargetId,
};
pub use crate::scene::{
    LoadSceneCallbacks, LoadSceneParams, SceneLifecycleManager, SceneRole, UnloadSceneCallbacks,
};
pub use crate::store::{
    AssetInfo, AssetObject, AssetToken, DirStore, DirTransport, LoaderRegistry, OpStatus,
    RemoteStore, SimulateStore, Store, Transport,
};
