use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::{diagnostics::Failure, value::Value};

pub type ScopeRef = Rc<RefCell<EngineScope>>;
pub type GlobalStoreRef = Rc<RefCell<GlobalStore>>;

/// The context's handle on the host global store. Every scope created from
/// a context shares one link, so swapping the store is seen by all of them.
pub type GlobalLink = Rc<RefCell<Option<GlobalStoreRef>>>;

/// Host-managed variable store, shared by any number of engine scopes.
#[derive(Debug, Default)]
pub struct GlobalStore {
    entries: IndexMap<String, Value>,
}

impl GlobalStore {
    pub fn new() -> GlobalStoreRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn from_entries(entries: IndexMap<String, Value>) -> GlobalStoreRef {
        Rc::new(RefCell::new(Self { entries }))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved variable.
///
/// `GlobalProxy` is built on demand when a name is missing locally but
/// present in the global store. Storing through it updates the global store
/// and leaves the local scope untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Local { name: String, value: Value },
    GlobalProxy { name: String, cached: Value },
}

impl Slot {
    pub fn name(&self) -> &str {
        match self {
            Slot::Local { name, .. } | Slot::GlobalProxy { name, .. } => name,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Slot::Local { value, .. } => value,
            Slot::GlobalProxy { cached, .. } => cached,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Slot::Local { value, .. } => value,
            Slot::GlobalProxy { cached, .. } => cached,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Slot::Local { .. })
    }

    /// Writes `value` to wherever this slot lives.
    pub fn store(&self, scope: &ScopeRef, value: Value) -> Result<(), Failure> {
        match self {
            Slot::Local { name, .. } => {
                write_scope(scope)?.locals.insert(name.clone(), value);
            }
            Slot::GlobalProxy { name, .. } => {
                let link = Rc::clone(&read_scope(scope)?.global);
                match linked_store(&link)? {
                    Some(store) => {
                        write_store(&store)?.insert(name.clone(), value);
                    }
                    None => {
                        return Err(Failure::internal(format!(
                            "global store for `{name}` was detached"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Top-level namespace of an execution context: local slots plus the link
/// to the host global store.
#[derive(Debug)]
pub struct EngineScope {
    name: String,
    locals: IndexMap<String, Value>,
    global: GlobalLink,
    revision: u64,
}

impl EngineScope {
    pub fn new(name: impl Into<String>, global: GlobalLink) -> ScopeRef {
        Rc::new(RefCell::new(Self {
            name: name.into(),
            locals: IndexMap::new(),
            global,
            revision: 0,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global_link(&self) -> &GlobalLink {
        &self.global
    }

    /// Bumped whenever a name disappears from the global store through this
    /// scope. Interpreters caching name lookups compare it before reuse.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Declares a local variable, shadowing any global of the same name.
    pub fn define(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.locals.insert(name.into(), value)
    }

    fn namespace_changed(&mut self) {
        self.revision += 1;
        debug!(scope = %self.name, revision = self.revision, "namespace changed");
    }

    /// Looks `name` up locally, then in the global store.
    pub fn resolve(scope: &ScopeRef, name: &str) -> Result<Option<Slot>, Failure> {
        let link = {
            let current = read_scope(scope)?;
            if let Some(value) = current.locals.get(name) {
                return Ok(Some(Slot::Local {
                    name: name.to_string(),
                    value: value.clone(),
                }));
            }
            Rc::clone(&current.global)
        };
        let Some(store) = linked_store(&link)? else {
            return Ok(None);
        };
        let store = read_store(&store)?;
        Ok(store.get(name).map(|value| Slot::GlobalProxy {
            name: name.to_string(),
            cached: value.clone(),
        }))
    }

    pub fn get_variable(scope: &ScopeRef, name: &str) -> Result<Option<Value>, Failure> {
        Ok(EngineScope::resolve(scope, name)?.map(Slot::into_value))
    }

    /// Assigns through the resolved slot, creating a local slot when the name
    /// is unknown. Returns the previous effective value.
    pub fn set_variable(
        scope: &ScopeRef,
        name: &str,
        value: Value,
    ) -> Result<Option<Value>, Failure> {
        match EngineScope::resolve(scope, name)? {
            Some(slot) => {
                slot.store(scope, value)?;
                Ok(Some(slot.into_value()))
            }
            None => {
                write_scope(scope)?.define(name, value);
                Ok(None)
            }
        }
    }

    /// Removes `name` from the local scope if it is defined there, otherwise
    /// from the global store. Returns the removed value.
    pub fn unset_variable(scope: &ScopeRef, name: &str) -> Result<Option<Value>, Failure> {
        let link = {
            let mut current = write_scope(scope)?;
            if let Some(value) = current.locals.shift_remove(name) {
                return Ok(Some(value));
            }
            Rc::clone(&current.global)
        };
        let Some(store) = linked_store(&link)? else {
            return Ok(None);
        };
        let removed = write_store(&store)?.remove(name);
        if removed.is_some() {
            write_scope(scope)?.namespace_changed();
        }
        Ok(removed)
    }

    pub fn unset_local(scope: &ScopeRef, name: &str) -> Result<Option<Value>, Failure> {
        Ok(write_scope(scope)?.locals.shift_remove(name))
    }

    pub fn get_local(scope: &ScopeRef, name: &str) -> Result<Option<Value>, Failure> {
        Ok(read_scope(scope)?.locals.get(name).cloned())
    }

    pub fn is_local(scope: &ScopeRef, name: &str) -> Result<bool, Failure> {
        Ok(read_scope(scope)?.locals.contains_key(name))
    }

    pub fn local_names(scope: &ScopeRef) -> Result<IndexSet<String>, Failure> {
        Ok(read_scope(scope)?.locals.keys().cloned().collect())
    }

    /// Local names followed by global names not shadowed locally.
    pub fn variable_names(scope: &ScopeRef) -> Result<IndexSet<String>, Failure> {
        let (mut names, link) = {
            let current = read_scope(scope)?;
            let names: IndexSet<String> = current.locals.keys().cloned().collect();
            (names, Rc::clone(&current.global))
        };
        if let Some(store) = linked_store(&link)? {
            names.extend(read_store(&store)?.keys().cloned());
        }
        Ok(names)
    }
}

fn read_scope(scope: &ScopeRef) -> Result<Ref<'_, EngineScope>, Failure> {
    scope
        .try_borrow()
        .map_err(|_| Failure::internal("engine scope is being modified by another caller"))
}

fn write_scope(scope: &ScopeRef) -> Result<RefMut<'_, EngineScope>, Failure> {
    scope
        .try_borrow_mut()
        .map_err(|_| Failure::internal("engine scope is in use by another caller"))
}

fn linked_store(link: &GlobalLink) -> Result<Option<GlobalStoreRef>, Failure> {
    link.try_borrow()
        .map(|store| store.as_ref().map(Rc::clone))
        .map_err(|_| Failure::internal("global store link is being replaced"))
}

fn read_store(store: &GlobalStoreRef) -> Result<Ref<'_, GlobalStore>, Failure> {
    store
        .try_borrow()
        .map_err(|_| Failure::internal("global store is being modified by another caller"))
}

fn write_store(store: &GlobalStoreRef) -> Result<RefMut<'_, GlobalStore>, Failure> {
    store
        .try_borrow_mut()
        .map_err(|_| Failure::internal("global store is in use by another caller"))
}
