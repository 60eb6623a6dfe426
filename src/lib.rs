//! Capstan streams content on demand from one or more named packages and
//! manages its lifetime afterwards: reference-counted sharing of loaded
//! assets, bounded per-tick progression of asynchronous work, and the
//! exclusivity rules between a single main scene and additively loaded
//! sub-scenes.
//!
//! # Package
//!
//! A package is a named, independently initialized source of loadable
//! content. Its descriptor says how it is served (simulated straight from
//! loose editor files, bundled offline, or downloaded from a host), and
//! initialization produces a manifest that maps symbolic locations onto
//! backing resources. See [`package`].
//!
//! # Resource
//!
//! Assets are requested by location, synchronously or asynchronously, and
//! come back as pooled, reference-counted handles. Asynchronous operations
//! never block the logic thread: they are polled once per tick under a
//! configurable time-slice budget. See [`res`].
//!
//! # Scene
//!
//! Scenes are assets with a lifecycle of their own. The single main scene
//! is swapped wholesale, reclaiming unused assets first, while sub-scenes
//! load additively and unload individually. See [`scene`].
//!
//! # Threading
//!
//! The whole engine is driven from one logic thread through
//! [`context::Context::update`]. Backing stores may do their I/O wherever
//! they like, but results only ever surface through poll-once-per-tick
//! operation objects, so none of the core bookkeeping needs a lock.

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

#[macro_use]
pub mod utils;

pub mod context;
pub mod errors;
pub mod manifest;
pub mod package;
pub mod prelude;
pub mod res;
pub mod scene;
pub mod store;
