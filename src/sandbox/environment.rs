//! Construction of the sandbox global table.
//!
//! The sandbox starts from nothing: only whitelisted base functions, the
//! version strings, a self reference and the host's safe replacements for
//! `print`, `pcall`, `xpcall` and `load` are put in. In particular `io`,
//! `debug`, `dofile`, `loadfile` and the host's own `load` and `require`
//! never appear.

use mlua::{Lua, Table, Value};

use crate::error::Result;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::{print_function, CapturedOutput};
use crate::sandbox::load::restricted_load;
use crate::sandbox::protect::ProtectedCalls;

/// Named registry key holding the sandbox table.
pub const SANDBOX_REGISTRY_KEY: &str = "lua_trusted_sandbox.sandbox";

/// Global naming the host version inside the sandbox.
pub const HOST_VERSION_GLOBAL: &str = "_HOSTVERSION";

/// Build the sandbox table and register it under [`SANDBOX_REGISTRY_KEY`].
pub fn build(lua: &Lua, config: &SandboxConfig, output: &CapturedOutput) -> Result<Table> {
    let globals = lua.globals();
    let sandbox = lua.create_table()?;

    for name in &config.builtins {
        let value: Value = globals.raw_get(name.as_str())?;
        if value.is_nil() {
            tracing::warn!(builtin = %name, "builtin missing from host globals, skipped");
            continue;
        }
        sandbox.raw_set(name.as_str(), value)?;
    }

    let lua_version: Value = globals.raw_get("_VERSION")?;
    sandbox.raw_set("_VERSION", lua_version)?;
    sandbox.raw_set(HOST_VERSION_GLOBAL, config.host_version.as_str())?;
    sandbox.raw_set("_G", sandbox.clone())?;

    sandbox.raw_set(
        "print",
        print_function(lua, output.clone(), config.echo_print)?,
    )?;
    let protected = ProtectedCalls::new(lua)?;
    sandbox.raw_set("pcall", protected.pcall)?;
    sandbox.raw_set("xpcall", protected.xpcall)?;
    sandbox.raw_set("load", restricted_load(lua, sandbox.clone())?)?;

    lua.set_named_registry_value(SANDBOX_REGISTRY_KEY, sandbox.clone())?;
    Ok(sandbox)
}

/// The sandbox table registered for this interpreter.
pub fn registered(lua: &Lua) -> Result<Option<Table>> {
    match lua.named_registry_value::<Value>(SANDBOX_REGISTRY_KEY)? {
        Value::Table(sandbox) => Ok(Some(sandbox)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_contents() {
        let lua = Lua::new();
        let output = CapturedOutput::new();
        let sandbox = build(&lua, &SandboxConfig::default(), &output).unwrap();

        for name in ["assert", "pairs", "tostring", "print", "pcall", "xpcall", "load"] {
            assert!(sandbox.contains_key(name).unwrap(), "{name} missing");
        }
        for name in ["io", "debug", "dofile", "loadfile", "require", "os", "string"] {
            assert!(!sandbox.contains_key(name).unwrap(), "{name} leaked");
        }

        let version: String = sandbox.get("_VERSION").unwrap();
        assert_eq!(version, "Lua 5.4");
        let host_version: String = sandbox.get(HOST_VERSION_GLOBAL).unwrap();
        assert!(host_version.starts_with(env!("CARGO_PKG_NAME")));

        let self_ref: Table = sandbox.get("_G").unwrap();
        assert_eq!(self_ref, sandbox);
        assert_eq!(registered(&lua).unwrap(), Some(sandbox));
    }

    #[test]
    fn test_missing_builtin_is_skipped() {
        let lua = Lua::new();
        let config = SandboxConfig {
            builtins: vec!["type".to_string(), "no_such_builtin".to_string()],
            ..SandboxConfig::default()
        };
        let sandbox = build(&lua, &config, &CapturedOutput::new()).unwrap();

        assert!(sandbox.contains_key("type").unwrap());
        assert!(!sandbox.contains_key("no_such_builtin").unwrap());
    }

    #[test]
    fn test_nothing_registered_before_build() {
        let lua = Lua::new();
        assert!(registered(&lua).unwrap().is_none());
    }
}
