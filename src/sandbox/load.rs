//! The sandbox `load`: text chunks only, sandbox environment by default.

use mlua::{Function, Lua, MultiValue, Table, Value};

use crate::error::Result;

/// The only chunk mode sandboxed code gets.
pub const TEXT_MODE: &str = "t";

/// Wrap the host's `load` for use inside the sandbox.
///
/// `load(chunk [, chunkname [, mode [, env]]])` always runs in text mode,
/// whatever `mode` says, so precompiled chunks are refused. Without a fourth
/// argument the chunk's environment is `sandbox`; an explicit `env`, even
/// `nil`, is passed through. The host `load`'s results are returned as is.
pub fn restricted_load(lua: &Lua, sandbox: Table) -> Result<Function> {
    let host_load: Function = lua.globals().get("load")?;
    let load = lua.create_function(move |lua, args: MultiValue| {
        let mut args = args.into_vec();
        let env_given = args.len() >= 4;
        args.resize(4, Value::Nil);
        args[2] = Value::String(lua.create_string(TEXT_MODE)?);
        if !env_given {
            args[3] = Value::Table(sandbox.clone());
        }
        host_load.call::<MultiValue>(MultiValue::from_vec(args))
    })?;
    Ok(load)
}
