//! kiln-lib: Core types and logic for kiln
//!
//! This crate turns a source tree into a runnable service image and starts
//! service instances from it:
//! - `descriptor`: the Lua build descriptor (`kiln.lua`) and its step list
//! - `build`: the typed image bootstrap sequencer and its step driver
//! - `store`: content-addressed storage for bases, layers, images and tags
//! - `container`: running instances that own their declared port
//! - `gc`: removal of unreferenced store content

pub mod build;
pub mod consts;
pub mod container;
pub mod descriptor;
pub mod gc;
pub mod image;
pub mod lock;
pub mod platform;
pub mod store;
pub mod util;
