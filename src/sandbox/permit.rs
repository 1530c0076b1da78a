//! The allow-list of modules sandboxed code may `require`.
//!
//! The list lives on the Rust side only. Sandboxed code never sees it as a
//! value; it can only ask the module loader to hand over an entry by name.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::Value;

/// An entry of the allow-list.
#[derive(Debug, Clone)]
pub enum Permit {
    /// A module resolved by the host when it was allowed.
    ///
    /// Handing it to the sandbox runs no code; the value is a snapshot
    /// taken at `allow` time.
    Resolved(Value),
}

impl Permit {
    /// The value handed to sandboxed code.
    pub fn value(&self) -> &Value {
        match self {
            Permit::Resolved(value) => value,
        }
    }

    /// Consume the permit, returning its value.
    pub fn into_value(self) -> Value {
        match self {
            Permit::Resolved(value) => value,
        }
    }
}

/// Allowed module names and what they resolve to.
///
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Rc<RefCell<BTreeMap<String, Permit>>>,
}

impl AllowList {
    /// Create an empty allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `name`, returning the permit it replaced.
    pub fn insert(&self, name: impl Into<String>, permit: Permit) -> Option<Permit> {
        self.entries.borrow_mut().insert(name.into(), permit)
    }

    /// Withdraw `name`.
    pub fn remove(&self, name: &str) -> Option<Permit> {
        self.entries.borrow_mut().remove(name)
    }

    /// Look up `name`.
    pub fn get(&self, name: &str) -> Option<Permit> {
        self.entries.borrow().get(name).cloned()
    }

    /// Check whether `name` is allowed.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Allowed names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Number of allowed names.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Check if nothing is allowed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove() {
        let permit = AllowList::new();
        assert!(permit.is_empty());

        assert!(permit
            .insert("json", Permit::Resolved(Value::Integer(1)))
            .is_none());
        let replaced = permit.insert("json", Permit::Resolved(Value::Integer(2)));
        assert!(matches!(replaced.map(Permit::into_value), Some(Value::Integer(1))));

        assert!(permit.contains("json"));
        assert!(matches!(permit.get("json").unwrap().value(), Value::Integer(2)));

        assert!(permit.remove("json").is_some());
        assert!(permit.remove("json").is_none());
        assert!(permit.get("json").is_none());
    }

    #[test]
    fn test_clones_share_entries() {
        let permit = AllowList::new();
        let view = permit.clone();

        permit.insert("b", Permit::Resolved(Value::Boolean(true)));
        permit.insert("a", Permit::Resolved(Value::Boolean(true)));

        assert_eq!(view.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(view.len(), 2);
    }
}
