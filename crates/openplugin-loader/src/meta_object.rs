//! Plugin factories.
//!
//! A [`MetaObject`] is the factory for one (derived class, base interface)
//! pair. It records the human-readable names given at registration, the
//! compiler identity of the base interface, the library it came from, and
//! the multiset of loader handles that currently claim it. The typed
//! construction entry point is erased behind [`std::any::Any`] and recovered
//! with a downcast gated by base-identity equality.

use std::any::Any;

use parking_lot::Mutex;

use crate::loader::LoaderId;

/// One entry in a factory owner multiset.
///
/// `None` is the distinguished NULL owner: the factory was registered while
/// no loader was driving a library open (a "non-pure" library).
pub type Owner = Option<LoaderId>;

/// Typed construction function for base interface `B`.
struct Creator<B: ?Sized + 'static>(fn() -> Box<B>);

/// Factory for one (derived, base) pair.
pub struct MetaObject {
    class_name: String,
    base_class_name: String,
    base_type: &'static str,
    library_path: String,
    owners: Mutex<Vec<Owner>>,
    creator: Box<dyn Any + Send + Sync>,
}

impl MetaObject {
    /// Build a factory producing `B` trait objects through `create`.
    ///
    /// The base identity is taken from the compiler via
    /// [`std::any::type_name`]; the library path is fixed for the lifetime
    /// of the factory.
    pub(crate) fn new<B: ?Sized + 'static>(
        class_name: &str,
        base_class_name: &str,
        library_path: &str,
        create: fn() -> Box<B>,
    ) -> Self {
        Self {
            class_name: class_name.to_string(),
            base_class_name: base_class_name.to_string(),
            base_type: std::any::type_name::<B>(),
            library_path: library_path.to_string(),
            owners: Mutex::new(Vec::new()),
            creator: Box::new(Creator::<B>(create)),
        }
    }

    /// The derived class name supplied at registration.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The human-readable base interface name supplied at registration.
    pub fn base_class_name(&self) -> &str {
        &self.base_class_name
    }

    /// The compiler identity of the base interface.
    pub fn base_type(&self) -> &'static str {
        self.base_type
    }

    /// The library this factory was registered from.
    pub fn library_path(&self) -> &str {
        &self.library_path
    }

    /// Construct a new instance typed as `B`.
    ///
    /// Returns `None` when `B` is not this factory's base interface; the
    /// downcast is what makes the erased storage safe.
    pub(crate) fn create<B: ?Sized + 'static>(&self) -> Option<Box<B>> {
        if self.base_type != std::any::type_name::<B>() {
            return None;
        }
        let creator = self.creator.downcast_ref::<Creator<B>>()?;
        Some((creator.0)())
    }

    /// Add one owner entry. The same owner may appear multiple times.
    pub(crate) fn add_owner(&self, owner: Owner) {
        self.owners.lock().push(owner);
    }

    /// Remove exactly one entry for `owner`, if present.
    pub(crate) fn remove_owner(&self, owner: Owner) {
        let mut owners = self.owners.lock();
        if let Some(index) = owners.iter().position(|entry| *entry == owner) {
            owners.remove(index);
        }
    }

    /// Whether the multiset contains `owner` (including the NULL owner when
    /// queried with `None`).
    pub fn is_owned_by(&self, owner: Owner) -> bool {
        self.owners.lock().contains(&owner)
    }

    /// Whether any owner entry exists at all.
    pub fn is_owned_by_anybody(&self) -> bool {
        !self.owners.lock().is_empty()
    }

    /// Snapshot of the owner multiset, for diagnostics.
    pub(crate) fn owners(&self) -> Vec<Owner> {
        self.owners.lock().clone()
    }
}
