//! Explicit component registry: `(role, hint)` to instance lookup.
//!
//! Replaces reflective dependency injection with a registry populated at
//! process start. Roles are trait objects; hints select among multiple
//! implementations of the same role (e.g. one action handler per action
//! kind).

use crate::error::ComponentLookupError;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Hint used when a role has a single default implementation.
pub const DEFAULT_HINT: &str = "default";

#[derive(Default)]
pub struct ComponentRegistry {
    components: RwLock<HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance` under role `T` and `hint`. A later registration
    /// for the same (role, hint) replaces the earlier one.
    pub fn register<T>(&self, hint: impl Into<String>, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.components
            .write()
            .insert((TypeId::of::<T>(), hint.into()), Box::new(instance));
    }

    pub fn register_default<T>(&self, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(DEFAULT_HINT, instance);
    }

    pub fn lookup<T>(&self, hint: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.components
            .read()
            .get(&(TypeId::of::<T>(), hint.to_string()))
            .and_then(|boxed| boxed.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn lookup_default<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup(DEFAULT_HINT)
    }

    pub fn lookup_or_err<T>(&self, hint: &str) -> Result<Arc<T>, ComponentLookupError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup(hint).ok_or_else(|| ComponentLookupError {
            role: std::any::type_name::<T>(),
            hint: hint.to_string(),
        })
    }

    /// Hints registered for role `T`, sorted.
    pub fn hints<T>(&self) -> Vec<String>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let components = self.components.read();
        let mut hints: Vec<String> = components
            .keys()
            .filter(|(type_id, _)| *type_id == TypeId::of::<T>())
            .map(|(_, hint)| hint.clone())
            .collect();
        hints.sort();
        hints
    }
}
