//! Registering host modules with the privileged `require`.
//!
//! Host services must be resolvable by the host's own `require` before the
//! sandbox admits them.

use mlua::{Function, IntoLua, Lua, Table, Value};

use crate::error::{Result, SandboxError};

fn host_package(lua: &Lua) -> Result<Table> {
    match lua.globals().get::<Value>("package")? {
        Value::Table(package) => Ok(package),
        _ => Err(SandboxError::Config(
            "host interpreter has no package library".to_string(),
        )),
    }
}

/// Make `value` the host module `name` (sets `package.loaded[name]`).
pub fn register_module(lua: &Lua, name: &str, value: impl IntoLua) -> Result<()> {
    let loaded: Table = host_package(lua)?.get("loaded")?;
    loaded.set(name, value)?;
    Ok(())
}

/// Register a loader run on the first privileged `require(name)`.
pub fn preload_module(lua: &Lua, name: &str, loader: Function) -> Result<()> {
    let preload: Table = host_package(lua)?.get("preload")?;
    preload.set(name, loader)?;
    Ok(())
}
