//! User-facing loader handles and the plugin instances they hand out.
//!
//! A [`PluginLoader`] is bound to exactly one library path and keeps a load
//! count against it. Eager handles load at construction; lazy handles load
//! on first instance creation and unload when the last instance goes away.
//! The self-unloading works through a drop guard attached to every instance
//! a lazy handle creates: the guard carries one load-count decrement and
//! pays it when the instance is dropped.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::console::log_warn;
use crate::error::PluginResult;
use crate::registry;

/// Identifies one loader handle in factory owner sets.
pub type LoaderId = u64;

fn next_loader_id() -> LoaderId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

struct LoaderCore {
    id: LoaderId,
    library_path: String,
    lazy: bool,
    load_count: Mutex<usize>,
}

impl LoaderCore {
    fn load(&self) -> PluginResult<()> {
        let mut count = self.load_count.lock();
        if *count == 0 {
            registry::load_library(&self.library_path, self.id)?;
        }
        match count.checked_add(1) {
            Some(next) => *count = next,
            None => log_warn!("load count saturated for {}", self.library_path),
        }
        Ok(())
    }

    fn unload(&self) -> PluginResult<()> {
        let mut count = self.load_count.lock();
        if *count == 0 {
            return Ok(());
        }
        *count -= 1;
        if *count == 0 {
            registry::unload_library(&self.library_path, self.id)?;
        }
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        let count = self.load_count.lock();
        *count > 0 && registry::is_library_loaded(&self.library_path, self.id)
    }
}

impl Drop for LoaderCore {
    fn drop(&mut self) {
        // A handle dropped while it still holds loads gives them all back,
        // so its ownership entries never outlive it. Outstanding instances
        // keep the core alive through their guards, so this cannot run
        // while the library is still in use via this handle.
        let count = *self.load_count.get_mut();
        if count > 0 {
            *self.load_count.get_mut() = 0;
            if let Err(err) = registry::unload_library(&self.library_path, self.id) {
                log_warn!("unload on loader drop failed: {err}");
            }
        }
    }
}

/// Keeps the library resident for as long as an instance created by a lazy
/// loader is alive. Dropping it pays back one load-count increment.
struct LibraryGuard {
    core: Arc<LoaderCore>,
}

impl Drop for LibraryGuard {
    fn drop(&mut self) {
        if let Err(err) = self.core.unload() {
            log_warn!("automatic unload failed: {err}");
        }
    }
}

/// Shared-ownership handle to a plugin instance.
///
/// Clones share the underlying object. For instances created by a lazy
/// loader, the library stays loaded until the last clone is dropped.
pub struct Instance<B: ?Sized + 'static> {
    object: Arc<B>,
    _guard: Option<Arc<LibraryGuard>>,
}

impl<B: ?Sized + 'static> std::fmt::Debug for Instance<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").finish_non_exhaustive()
    }
}

impl<B: ?Sized + 'static> Clone for Instance<B> {
    fn clone(&self) -> Self {
        Self {
            object: Arc::clone(&self.object),
            _guard: self._guard.clone(),
        }
    }
}

impl<B: ?Sized + 'static> Deref for Instance<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.object
    }
}

/// Exclusively owned plugin instance, with mutable access to the object.
///
/// Same lifetime tying as [`Instance`], without shared ownership.
pub struct UniqueInstance<B: ?Sized + 'static> {
    object: Box<B>,
    _guard: Option<LibraryGuard>,
}

impl<B: ?Sized + 'static> Deref for UniqueInstance<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.object
    }
}

impl<B: ?Sized + 'static> DerefMut for UniqueInstance<B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.object
    }
}

/// Handle over one plugin library.
///
/// # Example
///
/// ```no_run
/// use openplugin_loader::PluginLoader;
///
/// trait Animal {
///     fn say_something(&self) -> String;
/// }
///
/// # fn main() -> openplugin_loader::PluginResult<()> {
/// let loader = PluginLoader::new("libanimal_plugins.so")?;
/// for class_name in loader.available_classes::<dyn Animal>() {
///     let animal = loader.create_instance::<dyn Animal>(&class_name)?;
///     println!("{class_name}: {}", animal.say_something());
/// }
/// # Ok(())
/// # }
/// ```
pub struct PluginLoader {
    core: Arc<LoaderCore>,
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("library_path", &self.core.library_path)
            .field("lazy", &self.core.lazy)
            .finish()
    }
}

impl PluginLoader {
    /// Eager handle: loads `library_path` now and starts with load count 1.
    ///
    /// # Errors
    ///
    /// [`crate::PluginLoaderError::LibraryLoad`] when the library cannot be
    /// opened.
    pub fn new(library_path: impl Into<String>) -> PluginResult<Self> {
        let loader = Self::from_parts(library_path.into(), false);
        loader.load_library()?;
        Ok(loader)
    }

    /// Lazy handle: defers loading to the first instance creation, and
    /// unloads once the last instance (or explicit load) is released.
    pub fn lazy(library_path: impl Into<String>) -> Self {
        Self::from_parts(library_path.into(), true)
    }

    fn from_parts(library_path: String, lazy: bool) -> Self {
        Self {
            core: Arc::new(LoaderCore {
                id: next_loader_id(),
                library_path,
                lazy,
                load_count: Mutex::new(0),
            }),
        }
    }

    /// The library path this handle is bound to.
    pub fn library_path(&self) -> &str {
        &self.core.library_path
    }

    /// Whether this handle loads on demand and self-unloads.
    pub fn is_lazy(&self) -> bool {
        self.core.lazy
    }

    /// The current load count.
    pub fn load_count(&self) -> usize {
        *self.core.load_count.lock()
    }

    /// Load the library (first call) and increment the load count.
    ///
    /// # Errors
    ///
    /// [`crate::PluginLoaderError::LibraryLoad`] when the library cannot be
    /// opened.
    pub fn load_library(&self) -> PluginResult<()> {
        self.core.load()
    }

    /// Decrement the load count, unloading the library when it reaches
    /// zero. Calling this on an unloaded handle does nothing.
    ///
    /// # Errors
    ///
    /// [`crate::PluginLoaderError::LibraryUnload`] when the final unload
    /// fails.
    pub fn unload_library(&self) -> PluginResult<()> {
        self.core.unload()
    }

    /// Whether the library is loaded within the scope of this handle.
    pub fn is_library_loaded(&self) -> bool {
        self.core.is_loaded()
    }

    /// Derived class names available through this handle for base `B`.
    pub fn available_classes<B: ?Sized + 'static>(&self) -> Vec<String> {
        registry::available_classes::<B>(self.core.id)
    }

    /// Whether `class_name` is available through this handle for base `B`.
    pub fn is_class_available<B: ?Sized + 'static>(&self, class_name: &str) -> bool {
        self.available_classes::<B>()
            .iter()
            .any(|name| name == class_name)
    }

    /// Library paths in which this handle currently owns factories.
    pub fn owned_libraries(&self) -> Vec<String> {
        registry::all_libraries_used_by(self.core.id)
    }

    /// Create `class_name` as a shared [`Instance`] of base `B`.
    ///
    /// On a lazy handle this loads the library first if necessary and ties
    /// the library's residency to the instance. On an eager handle the
    /// caller keeps the library loaded through the handle itself.
    ///
    /// # Errors
    ///
    /// [`crate::PluginLoaderError::CreateClass`] when no factory for
    /// `class_name` is visible to this handle;
    /// [`crate::PluginLoaderError::LibraryLoad`] when a lazy load fails.
    pub fn create_instance<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> PluginResult<Instance<B>> {
        let (object, guard) = self.create_boxed::<B>(class_name)?;
        Ok(Instance {
            object: Arc::from(object),
            _guard: guard.map(Arc::new),
        })
    }

    /// Create `class_name` as an exclusively owned [`UniqueInstance`] of
    /// base `B`.
    ///
    /// # Errors
    ///
    /// As for [`PluginLoader::create_instance`].
    pub fn create_unique_instance<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> PluginResult<UniqueInstance<B>> {
        let (object, guard) = self.create_boxed::<B>(class_name)?;
        Ok(UniqueInstance {
            object,
            _guard: guard,
        })
    }

    fn create_boxed<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> PluginResult<(Box<B>, Option<LibraryGuard>)> {
        // Take the guard before attempting creation: if creation fails the
        // guard's drop gives the lazy load straight back.
        let guard = if self.core.lazy {
            self.core.load()?;
            Some(LibraryGuard {
                core: Arc::clone(&self.core),
            })
        } else {
            None
        };
        let object = registry::create_instance::<B>(class_name, self.core.id)?;
        Ok((object, guard))
    }
}
