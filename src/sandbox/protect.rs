//! Sandbox `pcall` and `xpcall`.
//!
//! They behave like the stock functions except that fatal errors (searcher
//! contract violations, memory exhaustion) keep unwinding instead of being
//! turned into a `false, err` result, and `xpcall` does not hand them to the
//! message handler. The wrappers are Lua functions so protected code may
//! still yield.

use mlua::{Function, Lua, Value};

use crate::error::{is_fatal_error, Result, LUA_MEMORY_ERROR};

const PROTECT_SOURCE: &str = r##"
local pcall, xpcall, error, select, type, is_fatal = ...

local function finish(ok, ...)
    if not ok and is_fatal((...)) then
        error((...), 0)
    end
    return ok, ...
end

local function trusted_pcall(f, ...)
    return finish(pcall(f, ...))
end

local function trusted_xpcall(...)
    local f, msgh = ...
    if type(msgh) ~= "function" then
        local got = select("#", ...) < 2 and "no value" or type(msgh)
        error("bad argument #2 to 'xpcall' (function expected, got " .. got .. ")", 2)
    end
    return finish(xpcall(f, function(err)
        if is_fatal(err) then
            return err
        end
        return msgh(err)
    end, select(3, ...)))
end

return trusted_pcall, trusted_xpcall
"##;

/// Protected call functions for the sandbox.
#[derive(Debug, Clone)]
pub struct ProtectedCalls {
    /// Sandbox `pcall`.
    pub pcall: Function,
    /// Sandbox `xpcall`.
    pub xpcall: Function,
}

impl ProtectedCalls {
    /// Build the wrappers around the host's `pcall` and `xpcall`.
    pub fn new(lua: &Lua) -> Result<Self> {
        let globals = lua.globals();
        let pcall: Function = globals.get("pcall")?;
        let xpcall: Function = globals.get("xpcall")?;
        let error: Function = globals.get("error")?;
        let select: Function = globals.get("select")?;
        let type_of: Function = globals.get("type")?;
        let is_fatal = lua.create_function(|_, err: Value| Ok(is_fatal_value(&err)))?;

        let (pcall, xpcall): (Function, Function) = lua
            .load(PROTECT_SOURCE)
            .set_name("=trusted.protect")
            .call((pcall, xpcall, error, select, type_of, is_fatal))?;
        Ok(Self { pcall, xpcall })
    }
}

/// Check an error value caught by a protected call.
///
/// Allocation failures inside Lua arrive as the plain memory error string,
/// not as a wrapped error.
fn is_fatal_value(err: &Value) -> bool {
    match err {
        Value::Error(err) => is_fatal_error(err),
        Value::String(msg) => msg == LUA_MEMORY_ERROR,
        _ => false,
    }
}
