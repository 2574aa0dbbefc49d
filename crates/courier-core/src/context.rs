//! Ambient values threaded through the delivery pipeline.
//!
//! A [`Context`] is an immutable, typed bag of values keyed by type. It lets
//! adapters carry capabilities (most importantly a caller-owned database
//! transaction) through publisher and bridge code that has no knowledge of
//! them. `with_value` returns a new context; existing clones are unaffected.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

/// An immutable typed-value bag, cheap to clone.
#[derive(Clone, Default)]
pub struct Context {
    values: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new context that additionally carries `value`.
    ///
    /// A value of the same type already present is replaced in the returned
    /// context only; the original is untouched.
    #[must_use]
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        let mut values: HashMap<_, _> = self.values.as_ref().clone();
        values.insert(TypeId::of::<T>(), Arc::new(value) as Arc<dyn Any + Send + Sync>);
        Self { values: Arc::new(values) }
    }

    /// Looks up a value by its type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>()).and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("values", &self.values.len()).finish()
    }
}
