//! Runtime plugin loading for Rust hosts.
//!
//! This crate loads shared libraries at runtime, collects the plugin
//! factories those libraries register while they are being opened, and
//! hands back trait objects of host-declared plugin interfaces:
//!
//! - [`PluginLoader`]: a handle over one library, eager or lazy, with a
//!   load count balancing explicit loads and outstanding instances.
//! - [`MultiLibraryPluginLoader`]: an aggregate that forwards creation
//!   across many libraries.
//! - [`register_plugin!`]: the macro a plugin library invokes once per
//!   (implementation, interface) pair.
//! - [`registry`]: the process-wide factory directory underneath the
//!   handles, including the graveyard that carries factories across
//!   apparent unload/reload cycles.
//! - [`in_process`]: a catalog of libraries whose code lives in the host
//!   binary itself, interchangeable with real shared libraries.
//!
//! # Library lifetime
//!
//! A library stays open while any handle holds a positive load count and
//! closes when the last count drops, provided no other handle still owns
//! factories in it. Instances created by a lazy handle carry a guard that
//! keeps the library resident for as long as they live.
//!
//! # Plugin ABI
//!
//! Host and plugin must see the same interface definitions from the same
//! crate, compiled with a compatible ABI. Libraries are opened with global
//! symbol binding so type identities agree across modules; the registry
//! compensates for the re-open quirks global binding brings with it.
//!
//! # Diagnostics
//!
//! Everything the loader does is reported through the [`console`], which
//! forwards to `tracing` by default and accepts replacement sinks.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod console;
pub mod error;
pub mod in_process;
pub mod loader;
mod macros;
pub mod meta_object;
pub mod multi_loader;
pub mod prelude;
pub mod registry;
pub mod shared_library;

#[doc(hidden)]
pub mod __private {
    pub use ctor::ctor;
}

pub use error::{PluginLoaderError, PluginResult};
pub use loader::{Instance, LoaderId, PluginLoader, UniqueInstance};
pub use multi_loader::MultiLibraryPluginLoader;
