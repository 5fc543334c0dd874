//! The process-wide factory registry.
//!
//! The registry owns four pieces of global state:
//!
//! - the **directory**: base interface identity → derived class name →
//!   factory, the structure every lookup goes through;
//! - the **graveyard**: factories detached from the directory because their
//!   last owner unloaded, kept alive because the underlying library may not
//!   have been truly evicted (global symbol binding means a re-open will not
//!   re-run its constructors — the graveyard lets the next open revive them);
//! - the **loaded-library table**: one entry per physically open library;
//! - the **ambients**: the library path and loader handle driving the open
//!   currently in progress, read by [`register_factory`] when a library's
//!   constructors fire.
//!
//! Locking: the table lock is acquired before the directory lock whenever
//! both are needed, and a dedicated serialisation lock covers the whole of
//! [`load_library`]. All three are reentrant, because a library's
//! constructors may call back into the registry while an open is on the
//! stack.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::ReentrantMutex;

use crate::console::{log_debug, log_error, log_warn};
use crate::error::{PluginLoaderError, PluginResult};
use crate::loader::LoaderId;
use crate::meta_object::{MetaObject, Owner};
use crate::shared_library::SharedLibrary;

type FactoryMap = BTreeMap<String, Arc<MetaObject>>;

struct Directory {
    /// Base interface identity → derived class name → factory.
    factories: BTreeMap<&'static str, FactoryMap>,
    graveyard: Vec<Arc<MetaObject>>,
    /// Ambient: path of the library currently being opened.
    loading_library: String,
    /// Ambient: loader driving the open currently in progress.
    active_loader: Owner,
}

struct Registry {
    /// Loaded-library table. A sequence rather than a map: iteration order
    /// must be stable, and one-entry-per-path is a runtime invariant.
    libraries: ReentrantMutex<RefCell<Vec<(String, Arc<SharedLibrary>)>>>,
    directory: ReentrantMutex<RefCell<Directory>>,
    /// Serialises concurrent [`load_library`] calls across all paths.
    load_serial: ReentrantMutex<()>,
    non_pure_opened: AtomicBool,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        libraries: ReentrantMutex::new(RefCell::new(Vec::new())),
        directory: ReentrantMutex::new(RefCell::new(Directory {
            factories: BTreeMap::new(),
            graveyard: Vec::new(),
            loading_library: String::new(),
            active_loader: None,
        })),
        load_serial: ReentrantMutex::new(()),
        non_pure_opened: AtomicBool::new(false),
    })
}

fn metas_for_library(directory: &Directory, library_path: &str) -> Vec<Arc<MetaObject>> {
    directory
        .factories
        .values()
        .flat_map(|map| map.values())
        .filter(|meta| meta.library_path() == library_path)
        .cloned()
        .collect()
}

/// Register a factory for `class_name` implementing the base interface `B`.
///
/// Invoked by the static constructors a plugin library runs while it is
/// being opened (normally through
/// [`register_plugin!`](crate::register_plugin), or from an
/// [in-process library](crate::in_process) constructor). The factory is
/// associated with the library currently being opened and owned by the
/// loader driving that open.
///
/// When no loader is driving an open, the library was brought into the
/// process by some other means (for example by linking it directly). The
/// factory is then recorded without an owner and unloading is permanently
/// disabled, because the registry can no longer tell which code is still in
/// use.
///
/// Registering a class name that already exists for `B` replaces the
/// previous factory; last writer wins.
pub fn register_factory<B: ?Sized + 'static>(
    class_name: &str,
    base_class_name: &str,
    create: fn() -> Box<B>,
) {
    let reg = registry();
    let (library_path, active_loader) = {
        let guard = reg.directory.lock();
        let directory = guard.borrow();
        (directory.loading_library.clone(), directory.active_loader)
    };

    log_debug!(
        "registering factory for class {class_name} (base {base_class_name}, \
         library {library_path:?}, loader {active_loader:?})"
    );

    if active_loader.is_none() {
        log_warn!(
            "a library containing plugins was opened outside the plugin loader; \
             its factories have no owning loader and no library can be safely \
             unloaded for the rest of this process. Isolate plugins into their \
             own libraries and open them through a loader handle"
        );
        reg.non_pure_opened.store(true, Ordering::SeqCst);
    }

    let meta = Arc::new(MetaObject::new::<B>(
        class_name,
        base_class_name,
        &library_path,
        create,
    ));
    meta.add_owner(active_loader);

    let guard = reg.directory.lock();
    let mut directory = guard.borrow_mut();
    let map = directory
        .factories
        .entry(std::any::type_name::<B>())
        .or_default();
    if map.contains_key(class_name) {
        log_warn!(
            "factory name collision for class {class_name} (base {base_class_name}); \
             the new factory replaces the existing one"
        );
    }
    map.insert(class_name.to_string(), meta);
}

/// Create an instance of `class_name` as a `B` trait object on behalf of
/// `loader`.
///
/// The factory must be owned by `loader`, or be an ownerless orphan from a
/// non-pure library open; anything else is not visible to this loader.
pub(crate) fn create_instance<B: ?Sized + 'static>(
    class_name: &str,
    loader: LoaderId,
) -> PluginResult<Box<B>> {
    let reg = registry();
    let meta = {
        let guard = reg.directory.lock();
        let directory = guard.borrow();
        directory
            .factories
            .get(std::any::type_name::<B>())
            .and_then(|map| map.get(class_name))
            .cloned()
    };

    let Some(meta) = meta else {
        log_error!("no factory exists for class {class_name}");
        return Err(PluginLoaderError::create_class(class_name));
    };

    if meta.is_owned_by(Some(loader)) {
        return meta
            .create::<B>()
            .ok_or_else(|| PluginLoaderError::create_class(class_name));
    }

    if meta.is_owned_by(None) {
        // Ownerless factory from a non-pure library open; the loader that
        // would own it never existed, so every loader may use it.
        log_debug!(
            "factory for {class_name} has no owning loader (non-pure library); \
             allowing creation"
        );
        return meta
            .create::<B>()
            .ok_or_else(|| PluginLoaderError::create_class(class_name));
    }

    log_debug!("factory for {class_name} is not owned by loader {loader}");
    Err(PluginLoaderError::create_class(class_name))
}

/// Derived class names visible to `loader` for base interface `B`: names of
/// factories owned by the loader, followed by ownerless orphans.
pub(crate) fn available_classes<B: ?Sized + 'static>(loader: LoaderId) -> Vec<String> {
    let reg = registry();
    let guard = reg.directory.lock();
    let directory = guard.borrow();

    let mut owned = Vec::new();
    let mut orphans = Vec::new();
    if let Some(map) = directory.factories.get(std::any::type_name::<B>()) {
        for (name, meta) in map {
            if meta.is_owned_by(Some(loader)) {
                owned.push(name.clone());
            } else if meta.is_owned_by(None) {
                orphans.push(name.clone());
            }
        }
    }
    owned.extend(orphans);
    owned
}

/// Distinct library paths in which `loader` currently owns factories.
pub(crate) fn all_libraries_used_by(loader: LoaderId) -> Vec<String> {
    let reg = registry();
    let guard = reg.directory.lock();
    let directory = guard.borrow();

    let mut paths: Vec<String> = Vec::new();
    for meta in directory.factories.values().flat_map(|map| map.values()) {
        if meta.is_owned_by(Some(loader)) && !paths.iter().any(|p| p == meta.library_path()) {
            paths.push(meta.library_path().to_string());
        }
    }
    paths
}

/// Whether any loader currently has `library_path` physically open.
pub fn is_library_loaded_by_anybody(library_path: &str) -> bool {
    let reg = registry();
    let guard = reg.libraries.lock();
    let libraries = guard.borrow();
    match libraries.iter().find(|(path, _)| path == library_path) {
        Some((_, library)) => {
            debug_assert!(library.is_loaded());
            true
        }
        None => false,
    }
}

/// Whether `library_path` is open within the scope of `loader`: physically
/// open, and its factories (if it has any) are bound to the loader.
pub(crate) fn is_library_loaded(library_path: &str, loader: LoaderId) -> bool {
    if !is_library_loaded_by_anybody(library_path) {
        return false;
    }
    let reg = registry();
    let guard = reg.directory.lock();
    let directory = guard.borrow();
    let metas = metas_for_library(&directory, library_path);
    metas.is_empty() || metas.iter().any(|meta| meta.is_owned_by(Some(loader)))
}

fn revive_from_graveyard(directory: &mut Directory, library_path: &str, loader: LoaderId) {
    let Directory {
        factories,
        graveyard,
        ..
    } = directory;
    for meta in graveyard.iter() {
        if meta.library_path() != library_path {
            continue;
        }
        log_debug!(
            "reviving factory for {} (base {}) from the graveyard, bound to loader {loader}",
            meta.class_name(),
            meta.base_class_name()
        );
        meta.add_owner(Some(loader));
        factories
            .entry(meta.base_type())
            .or_default()
            .insert(meta.class_name().to_string(), Arc::clone(meta));
    }
}

fn purge_graveyard(directory: &mut Directory, library_path: &str, delete_objs: bool) {
    let Directory {
        factories,
        graveyard,
        ..
    } = directory;
    let mut index = 0;
    while index < graveyard.len() {
        if graveyard[index].library_path() != library_path {
            index += 1;
            continue;
        }
        let meta = graveyard.remove(index);
        let still_in_directory = factories
            .get(meta.base_type())
            .and_then(|map| map.get(meta.class_name()))
            .is_some_and(|current| Arc::ptr_eq(current, &meta));
        if still_in_directory {
            log_debug!(
                "factory for {} purged from graveyard; the directory still references it",
                meta.class_name()
            );
        } else if delete_objs {
            debug_assert!(!registry().non_pure_opened.load(Ordering::SeqCst));
            log_debug!(
                "destroying factory for {} purged from graveyard",
                meta.class_name()
            );
            // Dropping the last handle here is the only place factories die.
            drop(meta);
        }
    }
}

/// Open `library_path` on behalf of `loader`.
///
/// Opening a library that is already open adds `loader` as an owner of its
/// factories and does nothing else. A fresh open runs the library's
/// constructors with the ambients pointing at this path and loader; if the
/// constructors registered nothing (a re-open after an apparent unload),
/// previously detached factories are revived from the graveyard instead.
pub(crate) fn load_library(library_path: &str, loader: LoaderId) -> PluginResult<()> {
    let reg = registry();
    log_debug!("attempting to load library {library_path} on behalf of loader {loader}");
    let _serial = reg.load_serial.lock();

    if is_library_loaded_by_anybody(library_path) {
        let guard = reg.directory.lock();
        let directory = guard.borrow();
        for meta in metas_for_library(&directory, library_path) {
            meta.add_owner(Some(loader));
        }
        log_debug!("library {library_path} already in memory; bound existing factories");
        return Ok(());
    }

    {
        let guard = reg.directory.lock();
        let mut directory = guard.borrow_mut();
        directory.loading_library = library_path.to_string();
        directory.active_loader = Some(loader);
    }
    // The open runs the library's constructors, which reenter the registry
    // through register_factory; no data lock may be held across it.
    let opened = SharedLibrary::open(library_path);
    {
        let guard = reg.directory.lock();
        let mut directory = guard.borrow_mut();
        directory.loading_library.clear();
        directory.active_loader = None;
    }
    let library = opened?;

    let guard = reg.directory.lock();
    let mut directory = guard.borrow_mut();
    let fresh = metas_for_library(&directory, library_path).len();
    if fresh == 0 {
        log_debug!(
            "library {library_path} registered no factories on open; \
             checking the graveyard for a previous load"
        );
        revive_from_graveyard(&mut directory, library_path, loader);
        purge_graveyard(&mut directory, library_path, false);
    } else {
        purge_graveyard(&mut directory, library_path, true);
    }
    drop(directory);
    drop(guard);

    let guard = reg.libraries.lock();
    guard
        .borrow_mut()
        .push((library_path.to_string(), Arc::new(library)));
    log_debug!("loaded library {library_path}");
    Ok(())
}

/// Unload `library_path` on behalf of `loader`.
///
/// Removes one ownership entry for `loader` from each of the library's
/// factories; factories left without any owner are detached into the
/// graveyard. The physical library is closed only when no factories for it
/// remain in the directory.
pub(crate) fn unload_library(library_path: &str, loader: LoaderId) -> PluginResult<()> {
    let reg = registry();
    if reg.non_pure_opened.load(Ordering::SeqCst) {
        log_warn!(
            "cannot unload {library_path} (or any other library): a non-pure \
             plugin library was opened in this process, so the registry cannot \
             tell which code is still in use"
        );
        return Ok(());
    }

    log_debug!("unloading library {library_path} on behalf of loader {loader}");
    let llt_guard = reg.libraries.lock();
    let mut libraries = llt_guard.borrow_mut();
    let Some(position) = libraries.iter().position(|(path, _)| path == library_path) else {
        return Err(PluginLoaderError::library_unload(format!(
            "attempt to unload {library_path}, which the plugin loader never loaded"
        )));
    };

    let remaining = {
        let guard = reg.directory.lock();
        let mut directory = guard.borrow_mut();
        let Directory {
            factories,
            graveyard,
            ..
        } = &mut *directory;
        for map in factories.values_mut() {
            map.retain(|_, meta| {
                if meta.library_path() != library_path || !meta.is_owned_by(Some(loader)) {
                    return true;
                }
                meta.remove_owner(Some(loader));
                if meta.is_owned_by_anybody() {
                    true
                } else {
                    log_debug!("moving factory for {} into the graveyard", meta.class_name());
                    graveyard.push(Arc::clone(meta));
                    false
                }
            });
        }
        metas_for_library(&directory, library_path).len()
    };

    if remaining == 0 {
        let (_, library) = libraries.remove(position);
        log_debug!("no factories remain for {library_path}; closing the library");
        library.close()?;
    } else {
        log_debug!(
            "factories for {library_path} are still owned by other loaders; \
             keeping the library open"
        );
    }
    Ok(())
}

/// Whether a library containing plugins has been opened by something other
/// than a loader handle. Once set, no library can be unloaded for the rest
/// of the process.
pub fn has_non_pure_library_been_opened() -> bool {
    registry().non_pure_opened.load(Ordering::SeqCst)
}

/// Human-readable dump of the loaded-library table, the directory and the
/// graveyard.
pub fn debug_snapshot() -> String {
    let reg = registry();
    let mut out = String::new();

    let llt_guard = reg.libraries.lock();
    let libraries = llt_guard.borrow();
    let _ = writeln!(out, "open libraries ({}):", libraries.len());
    for (path, library) in libraries.iter() {
        let _ = writeln!(out, "  {path} (loaded: {})", library.is_loaded());
    }

    let guard = reg.directory.lock();
    let directory = guard.borrow();
    let total: usize = directory.factories.values().map(|map| map.len()).sum();
    let _ = writeln!(out, "factories ({total}):");
    for (base_type, map) in &directory.factories {
        for (name, meta) in map {
            let _ = writeln!(
                out,
                "  {name} (base {}, identity {base_type}, library {}, owners {:?})",
                meta.base_class_name(),
                meta.library_path(),
                meta.owners()
            );
        }
    }
    let _ = writeln!(out, "graveyard ({}):", directory.graveyard.len());
    for meta in &directory.graveyard {
        let _ = writeln!(
            out,
            "  {} (base {}, library {})",
            meta.class_name(),
            meta.base_class_name(),
            meta.library_path()
        );
    }
    out
}
