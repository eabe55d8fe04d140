//! Map-like view over an engine scope for host code.
//!
//! Reads see local variables first and fall back to the host global store.
//! Writes land where the name currently resolves: a global-only name is
//! updated in the global store, anything else in the local scope.

use std::{
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::warn;

use crate::{
    diagnostics::Failure,
    environment::{EngineScope, ScopeRef},
    translate::{ScriptError, translate},
    value::{Value, ValueKind},
};

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("variable name cannot be null")]
    NullKey,
    #[error("variable name must be a String: {found}")]
    InvalidKeyType { found: &'static str },
    #[error("{message}")]
    IllegalState {
        message: String,
        #[source]
        source: ScriptError,
    },
}

/// Anything a host may pass as a variable name. Only strings are accepted;
/// `None` and the unit value count as null.
pub trait BindingKey {
    fn binding_name(&self) -> Result<&str, BindingError>;
}

impl BindingKey for str {
    fn binding_name(&self) -> Result<&str, BindingError> {
        Ok(self)
    }
}

impl BindingKey for String {
    fn binding_name(&self) -> Result<&str, BindingError> {
        Ok(self)
    }
}

impl BindingKey for Value {
    fn binding_name(&self) -> Result<&str, BindingError> {
        match &*self.0 {
            ValueKind::String(name) => Ok(name),
            ValueKind::Unit => Err(BindingError::NullKey),
            _ => Err(BindingError::InvalidKeyType {
                found: self.type_name(),
            }),
        }
    }
}

impl<T: BindingKey + ?Sized> BindingKey for &T {
    fn binding_name(&self) -> Result<&str, BindingError> {
        (**self).binding_name()
    }
}

impl<T: BindingKey> BindingKey for Option<T> {
    fn binding_name(&self) -> Result<&str, BindingError> {
        match self {
            Some(key) => key.binding_name(),
            None => Err(BindingError::NullKey),
        }
    }
}

/// Variable bindings of one engine scope.
///
/// Cloning yields another handle on the same scope; handles compare equal
/// exactly when they share a scope.
#[derive(Clone)]
pub struct Bindings {
    scope: ScopeRef,
}

impl Bindings {
    pub fn new(scope: ScopeRef) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn len(&self) -> Result<usize, BindingError> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, BindingError> {
        Ok(self.len()? == 0)
    }

    /// Null and non-string keys are never contained.
    pub fn contains_key<K: BindingKey + ?Sized>(&self, key: &K) -> Result<bool, BindingError> {
        match key.binding_name() {
            Ok(name) => Ok(self.keys()?.contains(name)),
            Err(_) => Ok(false),
        }
    }

    pub fn contains_value(&self, value: &Value) -> Result<bool, BindingError> {
        for name in self.keys()? {
            if self.lookup(&name)?.as_ref() == Some(value) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn get<K: BindingKey + ?Sized>(&self, key: &K) -> Result<Option<Value>, BindingError> {
        let name = key.binding_name()?;
        self.lookup(name)
    }

    /// Returns the value `key` resolved to before the write.
    pub fn put<K: BindingKey + ?Sized>(
        &self,
        key: &K,
        value: Value,
    ) -> Result<Option<Value>, BindingError> {
        let name = key.binding_name()?;
        EngineScope::set_variable(&self.scope, name, value)
            .map_err(|failure| illegal_state("Error setting variable", name, failure))
    }

    pub fn remove<K: BindingKey + ?Sized>(&self, key: &K) -> Result<Option<Value>, BindingError> {
        let name = key.binding_name()?;
        EngineScope::unset_variable(&self.scope, name)
            .map_err(|failure| illegal_state("Error removing variable", name, failure))
    }

    pub fn put_all<I, K>(&self, entries: I) -> Result<(), BindingError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: BindingKey,
    {
        for (key, value) in entries {
            self.put(&key, value)?;
        }
        Ok(())
    }

    /// Empties the union view. A name defined both locally and globally is
    /// removed from both stores.
    pub fn clear(&self) -> Result<(), BindingError> {
        for name in self.keys()? {
            while EngineScope::unset_variable(&self.scope, &name)
                .map_err(|failure| illegal_state("Error removing variable", &name, failure))?
                .is_some()
            {}
        }
        Ok(())
    }

    pub fn keys(&self) -> Result<IndexSet<String>, BindingError> {
        EngineScope::variable_names(&self.scope)
            .map_err(|failure| illegal_state("Error listing variables", "*", failure))
    }

    pub fn values(&self) -> Result<Vec<Value>, BindingError> {
        let mut values = Vec::new();
        for name in self.keys()? {
            if let Some(value) = self.lookup(&name)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    pub fn entries(&self) -> Result<EntrySet, BindingError> {
        let mut entries = IndexMap::new();
        for name in self.keys()? {
            if let Some(value) = self.lookup(&name)? {
                entries.insert(name, value);
            }
        }
        Ok(EntrySet { entries })
    }

    pub fn local_keys(&self) -> Result<IndexSet<String>, BindingError> {
        EngineScope::local_names(&self.scope)
            .map_err(|failure| illegal_state("Error listing variables", "*", failure))
    }

    pub fn get_local(&self, name: &str) -> Result<Option<Value>, BindingError> {
        EngineScope::get_local(&self.scope, name)
            .map_err(|failure| illegal_state("Error accessing variable", name, failure))
    }

    pub fn is_local(&self, name: &str) -> Result<bool, BindingError> {
        EngineScope::is_local(&self.scope, name)
            .map_err(|failure| illegal_state("Error accessing variable", name, failure))
    }

    /// Removes only a local definition; the global store is never touched.
    pub fn remove_local(&self, name: &str) -> Result<Option<Value>, BindingError> {
        EngineScope::unset_local(&self.scope, name)
            .map_err(|failure| illegal_state("Error removing variable", name, failure))
    }

    fn lookup(&self, name: &str) -> Result<Option<Value>, BindingError> {
        EngineScope::get_variable(&self.scope, name)
            .map_err(|failure| illegal_state("Error accessing variable", name, failure))
    }
}

fn illegal_state(action: &str, name: &str, failure: Failure) -> BindingError {
    warn!(variable = name, %failure, "{action}");
    BindingError::IllegalState {
        message: format!("{action}: {name}"),
        source: translate(failure),
    }
}

impl PartialEq for Bindings {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }
}

impl Eq for Bindings {}

impl Hash for Bindings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.scope), state);
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope.try_borrow() {
            Ok(scope) => f
                .debug_struct("Bindings")
                .field("scope", &scope.name())
                .finish(),
            Err(_) => f.debug_struct("Bindings").finish_non_exhaustive(),
        }
    }
}

/// Read-only snapshot of the visible bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySet {
    entries: IndexMap<String, Value>,
}

impl EntrySet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<'a> IntoIterator for &'a EntrySet {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
