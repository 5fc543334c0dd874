//! Aggregate loader over many plugin libraries.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::console::log_debug;
use crate::error::{PluginLoaderError, PluginResult};
use crate::loader::{Instance, PluginLoader, UniqueInstance};

/// Owns one [`PluginLoader`] per library path and forwards creation across
/// all of them.
pub struct MultiLibraryPluginLoader {
    lazy: bool,
    loaders: Mutex<BTreeMap<String, PluginLoader>>,
}

impl MultiLibraryPluginLoader {
    /// New aggregate; `lazy` controls the mode of every handle it creates.
    pub fn new(lazy: bool) -> Self {
        Self {
            lazy,
            loaders: Mutex::new(BTreeMap::new()),
        }
    }

    /// Add a handle for `library_path`. Adding a path twice does nothing.
    ///
    /// # Errors
    ///
    /// [`PluginLoaderError::LibraryLoad`] when a non-lazy aggregate fails to
    /// open the library.
    pub fn load_library(&self, library_path: &str) -> PluginResult<()> {
        let mut loaders = self.loaders.lock();
        if loaders.contains_key(library_path) {
            return Ok(());
        }
        let loader = if self.lazy {
            PluginLoader::lazy(library_path)
        } else {
            PluginLoader::new(library_path)?
        };
        loaders.insert(library_path.to_string(), loader);
        Ok(())
    }

    /// Drop the handle for `library_path`, releasing whatever it still
    /// holds. Unknown paths are a no-op.
    pub fn unload_library(&self, library_path: &str) {
        if self.loaders.lock().remove(library_path).is_none() {
            log_debug!("no handle for {library_path} in this multi-loader");
        }
    }

    /// Whether a handle for `library_path` exists.
    pub fn is_library_available(&self, library_path: &str) -> bool {
        self.loaders.lock().contains_key(library_path)
    }

    /// The paths this aggregate currently has handles for.
    pub fn registered_libraries(&self) -> Vec<String> {
        self.loaders.lock().keys().cloned().collect()
    }

    /// Class names for base `B` across all handles, in library-path order.
    pub fn available_classes<B: ?Sized + 'static>(&self) -> Vec<String> {
        let loaders = self.loaders.lock();
        loaders
            .values()
            .flat_map(|loader| loader.available_classes::<B>())
            .collect()
    }

    /// Find the handle advertising `class_name` for base `B`, loading
    /// not-yet-loaded libraries along the way so their classes can be seen.
    fn loader_for_class<'a, B: ?Sized + 'static>(
        loaders: &'a BTreeMap<String, PluginLoader>,
        class_name: &str,
    ) -> PluginResult<Option<&'a PluginLoader>> {
        for loader in loaders.values() {
            if !loader.is_library_loaded() {
                loader.load_library()?;
            }
            if loader.is_class_available::<B>(class_name) {
                return Ok(Some(loader));
            }
        }
        Ok(None)
    }

    /// Create `class_name` as base `B` from the first library that
    /// advertises it.
    ///
    /// # Errors
    ///
    /// [`PluginLoaderError::CreateClass`] when no registered library
    /// advertises `class_name` for `B`;
    /// [`PluginLoaderError::LibraryLoad`] when loading a library during the
    /// search fails.
    pub fn create_instance<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> PluginResult<Instance<B>> {
        let loaders = self.loaders.lock();
        match Self::loader_for_class::<B>(&loaders, class_name)? {
            Some(loader) => loader.create_instance::<B>(class_name),
            None => Err(PluginLoaderError::create_class(class_name)),
        }
    }

    /// As [`Self::create_instance`], with exclusive ownership.
    ///
    /// # Errors
    ///
    /// As for [`Self::create_instance`].
    pub fn create_unique_instance<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> PluginResult<UniqueInstance<B>> {
        let loaders = self.loaders.lock();
        match Self::loader_for_class::<B>(&loaders, class_name)? {
            Some(loader) => loader.create_unique_instance::<B>(class_name),
            None => Err(PluginLoaderError::create_class(class_name)),
        }
    }

    /// Create `class_name` as base `B` from `library_path` specifically.
    ///
    /// # Errors
    ///
    /// [`PluginLoaderError::CreateClass`] when this aggregate has no handle
    /// for `library_path`, or the class is not visible through it.
    pub fn create_instance_in<B: ?Sized + 'static>(
        &self,
        library_path: &str,
        class_name: &str,
    ) -> PluginResult<Instance<B>> {
        let loaders = self.loaders.lock();
        match loaders.get(library_path) {
            Some(loader) => loader.create_instance::<B>(class_name),
            None => Err(PluginLoaderError::create_class(class_name)),
        }
    }
}

impl Default for MultiLibraryPluginLoader {
    fn default() -> Self {
        Self::new(false)
    }
}
