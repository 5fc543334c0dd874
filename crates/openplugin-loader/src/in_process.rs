//! In-process plugin libraries.
//!
//! The shared-library primitive is substitutable: a host can register
//! "libraries" whose constructors are plain functions compiled into the
//! current binary. [`crate::shared_library::SharedLibrary::open`] consults
//! this catalog before falling back to the OS loader, so loader handles,
//! the registry and the graveyard treat an in-process library exactly like
//! a real one.
//!
//! Constructors run only on the *first* open in a process. This mirrors
//! global-symbol dynamic loading, where closing a library does not evict
//! its code and a later re-open does not re-run its constructors — the
//! situation the registry graveyard exists to compensate for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::console::log_warn;

/// A library whose code lives in the current binary.
///
/// The path is an arbitrary key; it never touches the filesystem. The
/// constructor functions play the role of the static initialisers a real
/// shared library would run on load, and will typically call
/// [`crate::registry::register_factory`].
pub struct InProcessLibrary {
    path: String,
    constructors: Vec<fn()>,
    constructors_ran: AtomicBool,
}

impl InProcessLibrary {
    /// New empty library registered under `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            constructors: Vec::new(),
            constructors_ran: AtomicBool::new(false),
        }
    }

    /// Append a constructor function, run on the library's first open.
    pub fn with_constructor(mut self, constructor: fn()) -> Self {
        self.constructors.push(constructor);
        self
    }

    /// The catalog key for this library.
    pub fn path(&self) -> &str {
        &self.path
    }
}

type Catalog = HashMap<String, Arc<InProcessLibrary>>;

fn catalog() -> &'static Mutex<Catalog> {
    static CATALOG: OnceLock<Mutex<Catalog>> = OnceLock::new();
    CATALOG.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Add `library` to the process-global catalog.
///
/// Catalog entries live for the rest of the process, like any other linked
/// code. Installing a second library under an already-used path replaces the
/// entry and is almost certainly a mistake, so it is reported.
pub fn install(library: InProcessLibrary) {
    let mut catalog = catalog().lock();
    if catalog.contains_key(library.path()) {
        log_warn!(
            "replacing in-process library previously installed under {}",
            library.path()
        );
    }
    catalog.insert(library.path.clone(), Arc::new(library));
}

/// Whether the catalog knows `path`.
pub fn is_installed(path: &str) -> bool {
    catalog().lock().contains_key(path)
}

/// Handle returned to the shared-library primitive for an open in-process
/// library. Dropping it "closes" the library; the code, of course, stays.
pub(crate) struct InProcessHandle {
    _library: Arc<InProcessLibrary>,
}

/// Open `path` from the catalog, running its constructors if this is the
/// first open in the process. Returns `None` for unknown paths.
pub(crate) fn open(path: &str) -> Option<InProcessHandle> {
    let library = catalog().lock().get(path).cloned()?;
    if !library.constructors_ran.swap(true, Ordering::SeqCst) {
        for constructor in &library.constructors {
            constructor();
        }
    }
    Some(InProcessHandle { _library: library })
}
