//! Commonly used utilities like handles, pools and hash containers.

#[macro_use]
pub mod handle;
pub mod handle_pool;
pub mod hash;
pub mod object_pool;

pub mod prelude {
    pub use super::handle::{Handle, HandleIndex, HandleLike};
    pub use super::handle_pool::HandlePool;
    pub use super::hash::{FastHashMap, FastHashSet};
    pub use super::object_pool::ObjectPool;
}

pub use self::handle::{Handle, HandleIndex, HandleLike};
pub use self::handle_pool::HandlePool;
pub use self::hash::{FastHashMap, FastHashSet};
pub use self::object_pool::ObjectPool;

pub use uuid::Uuid;
