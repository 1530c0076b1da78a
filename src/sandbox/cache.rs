//! The sandbox's record of loaded modules.
//!
//! This is the table sandboxed code sees as `package.loaded`. Access from
//! the loader is raw, so metatables set by sandboxed code never run here.

use mlua::{IntoLua, Lua, Table, Value};

use crate::error::Result;

/// Resolved modules keyed by name. Names are Lua strings of any bytes.
#[derive(Debug, Clone)]
pub struct LoadedCache {
    table: Table,
}

impl LoadedCache {
    /// Create an empty cache.
    pub fn new(lua: &Lua) -> Result<Self> {
        Ok(Self {
            table: lua.create_table()?,
        })
    }

    /// The cached value for `name`, if it is truthy.
    pub fn get(&self, name: impl IntoLua) -> Result<Option<Value>> {
        let value: Value = self.table.raw_get(name)?;
        Ok(match value {
            Value::Nil | Value::Boolean(false) => None,
            value => Some(value),
        })
    }

    /// Record a resolved module.
    pub fn store(&self, name: impl IntoLua, value: Value) -> Result<()> {
        self.table.raw_set(name, value)?;
        Ok(())
    }

    /// Forget `name`.
    pub fn remove(&self, name: impl IntoLua) -> Result<()> {
        self.table.raw_set(name, Value::Nil)?;
        Ok(())
    }

    /// Check whether `name` holds a truthy value.
    pub fn contains(&self, name: impl IntoLua) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// The underlying `package.loaded` table.
    pub fn table(&self) -> &Table {
        &self.table
    }
}
