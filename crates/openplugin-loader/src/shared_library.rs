//! The OS shared-library primitive.
//!
//! [`SharedLibrary`] abstracts one physical dynamic library: open by path
//! (which runs the library's static constructors), close, residency probe
//! and symbol lookup. The four operations are mutually exclusive through a
//! single internal lock.
//!
//! On Unix targets libraries are opened with `RTLD_NOW | RTLD_GLOBAL`.
//! Global binding is required so that runtime type identities unify across
//! module boundaries; the flip side — a close that does not actually evict
//! code — is compensated for by the registry graveyard.

use std::ffi::c_void;

use parking_lot::Mutex;

use crate::error::{PluginLoaderError, PluginResult};
use crate::in_process::{self, InProcessHandle};

enum Backend {
    Os(libloading::Library),
    InProcess(InProcessHandle),
}

/// One physical open of a shared library.
pub struct SharedLibrary {
    path: String,
    backend: Mutex<Option<Backend>>,
}

impl std::fmt::Debug for SharedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SharedLibrary {
    /// Open the library at `path`, running its static constructors.
    ///
    /// Paths installed in the [in-process catalog](crate::in_process) are
    /// resolved there; anything else goes to the OS loader.
    ///
    /// # Errors
    ///
    /// [`PluginLoaderError::LibraryLoad`] with the OS diagnostic if the
    /// library cannot be opened.
    pub fn open(path: &str) -> PluginResult<Self> {
        let backend = match in_process::open(path) {
            Some(handle) => Backend::InProcess(handle),
            None => {
                let library = unsafe { os_open(path) }.map_err(|err| {
                    PluginLoaderError::LibraryLoad {
                        path: path.to_string(),
                        reason: err.to_string(),
                    }
                })?;
                Backend::Os(library)
            }
        };
        Ok(Self {
            path: path.to_string(),
            backend: Mutex::new(Some(backend)),
        })
    }

    /// Ask the OS to unload the library. Idempotent.
    ///
    /// # Errors
    ///
    /// [`PluginLoaderError::LibraryUnload`] if the OS reports a failure.
    pub fn close(&self) -> PluginResult<()> {
        let mut backend = self.backend.lock();
        match backend.take() {
            Some(Backend::Os(library)) => library
                .close()
                .map_err(|err| PluginLoaderError::library_unload(err.to_string())),
            // In-process code is part of the binary; there is nothing to
            // evict beyond forgetting the handle.
            Some(Backend::InProcess(_)) | None => Ok(()),
        }
    }

    /// This handle's belief about residency.
    pub fn is_loaded(&self) -> bool {
        self.backend.lock().is_some()
    }

    /// Address of `name`, or `None` when the symbol cannot be resolved.
    ///
    /// In-process libraries export no symbols.
    pub fn find_symbol(&self, name: &str) -> Option<*const c_void> {
        let backend = self.backend.lock();
        match &*backend {
            Some(Backend::Os(library)) => {
                let symbol = unsafe { library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
                Some(*symbol as *const c_void)
            }
            Some(Backend::InProcess(_)) | None => None,
        }
    }

    /// The path this library was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(unix)]
unsafe fn os_open(path: &str) -> Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
    let library = unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }?;
    Ok(library.into())
}

#[cfg(windows)]
unsafe fn os_open(path: &str) -> Result<libloading::Library, libloading::Error> {
    unsafe { libloading::Library::new(path) }
}

/// Platform file name for a library stem: `"wheel"` becomes `libwheel.so`
/// on Linux, `libwheel.dylib` on macOS and `wheel.dll` on Windows.
pub fn platform_library_name(stem: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{stem}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{stem}.dylib")
    } else {
        format!("lib{stem}.so")
    }
}
