//! The management object for one sandbox.
//!
//! [`Trusted`] owns the sandbox table, the allow-list and the sandbox module
//! loader of one interpreter. Its `require`, `allow` and `remove` operations
//! are for the host only; sandboxed code never gets a handle to them.
//!
//! Modules required outside and then admitted are shared by reference. Any
//! value a module keeps inside itself, including other modules, is reachable
//! from the sandbox once the module is, so admitting a module that exposes
//! the real globals or a dangerous library defeats the sandbox.

use std::rc::Rc;

use mlua::{Function, Lua, MultiValue, Table, Value};

use crate::error::Result;
use crate::sandbox::config::{ModuleBinding, SandboxConfig};
use crate::sandbox::environment;
use crate::sandbox::host;
use crate::sandbox::io::CapturedOutput;
use crate::sandbox::limits::{self, MemoryUsage};
use crate::sandbox::loader::{check_name, open_package, opt_name, ModuleLoader};
use crate::sandbox::os::{self, TRUSTED_OS_MODULE};
use crate::sandbox::permit::{AllowList, Permit};

/// Registries of one sandbox. Holds no interpreter handle, so Lua functions
/// may capture it without keeping the interpreter alive.
#[derive(Debug)]
struct State {
    sandbox: Table,
    permit: AllowList,
    loader: Rc<ModuleLoader>,
    output: CapturedOutput,
    max_memory: Option<usize>,
}

impl State {
    fn require(&self, lua: &Lua, module: &str, exposed: Option<&str>) -> Result<()> {
        let exposed = exposed.unwrap_or(module);
        let value = privileged_require(lua, module)?;
        self.sandbox.raw_set(exposed, value)?;
        tracing::debug!(module = %module, exposed = %exposed, "module bound into sandbox");
        Ok(())
    }

    fn allow(&self, lua: &Lua, module: &str, exposed: Option<&str>) -> Result<()> {
        let exposed = exposed.unwrap_or(module);
        let value = privileged_require(lua, module)?;
        self.permit.insert(exposed, Permit::Resolved(value));
        tracing::debug!(module = %module, exposed = %exposed, "module allowed in sandbox");
        Ok(())
    }

    fn remove(&self, exposed: &str) -> Result<()> {
        self.permit.remove(exposed);
        self.sandbox.raw_set(exposed, Value::Nil)?;
        self.loader.cache().remove(exposed)?;
        tracing::debug!(exposed = %exposed, "module removed from sandbox");
        Ok(())
    }

    /// Allow `binding`, then require it inside the sandbox and bind the
    /// result as a global, as if the sandbox had run
    /// `name = require "name"` itself.
    fn admit(&self, lua: &Lua, binding: &ModuleBinding) -> Result<()> {
        self.allow(lua, &binding.module, None)?;
        let value = self.loader.require(lua, &binding.module)?;
        self.sandbox.raw_set(binding.exposed_name(), value)?;
        Ok(())
    }
}

/// Resolve `module` with the host's own, unrestricted `require`.
fn privileged_require(lua: &Lua, module: &str) -> Result<Value> {
    let require: Function = lua.globals().get("require")?;
    Ok(require.call::<Value>(module)?)
}

/// Management object of a sandbox.
///
/// Clones share the same sandbox.
#[derive(Clone)]
pub struct Trusted {
    lua: Lua,
    state: Rc<State>,
}

impl std::fmt::Debug for Trusted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trusted")
            .field("lua", &"<mlua::Lua>")
            .field("state", &self.state)
            .finish()
    }
}

impl Trusted {
    /// Create the sandbox in `lua` and populate it from `config`.
    ///
    /// Host service modules named by the config must already be resolvable
    /// by the host's `require` (see [`crate::sandbox::host`]).
    pub fn open(lua: &Lua, config: SandboxConfig) -> Result<Self> {
        config.validate()?;

        let permit = AllowList::new();
        let output = CapturedOutput::new();
        let sandbox = environment::build(lua, &config, &output)?;

        let (package, loader) = open_package(lua, permit.clone())?;
        let require: Value = package.get("require")?;
        sandbox.raw_set("require", require)?;
        sandbox.raw_set("package", package)?;

        let state = Rc::new(State {
            sandbox,
            permit,
            loader,
            output,
            max_memory: config.max_memory,
        });

        for binding in config.libraries.iter().chain(&config.host_services) {
            state.admit(lua, binding)?;
        }
        for binding in &config.allowed {
            state.allow(lua, &binding.module, binding.exposed.as_deref())?;
        }

        let restricted_os = os::open_restricted(lua, &config.os_functions)?;
        host::register_module(lua, TRUSTED_OS_MODULE, restricted_os)?;
        state.allow(lua, TRUSTED_OS_MODULE, Some("os"))?;
        let sandbox_os = state.loader.require(lua, "os")?;
        state.sandbox.raw_set("os", sandbox_os)?;

        limits::apply_memory_limit(lua, config.max_memory)?;

        tracing::debug!(
            allowed = state.permit.len(),
            max_memory = ?config.max_memory,
            "sandbox opened"
        );
        Ok(Self {
            lua: lua.clone(),
            state,
        })
    }

    /// Resolve `module` with the host's `require` and bind it as sandbox
    /// global `exposed` (default: `module`).
    pub fn require(&self, module: &str, exposed: Option<&str>) -> Result<()> {
        self.state.require(&self.lua, module, exposed)
    }

    /// Resolve `module` with the host's `require` now and let sandboxed code
    /// `require(exposed)` it later (default: `module`).
    ///
    /// The sandbox receives the value resolved here; replacing the module
    /// on the host side afterwards does not change what it gets.
    pub fn allow(&self, module: &str, exposed: Option<&str>) -> Result<()> {
        self.state.allow(&self.lua, module, exposed)
    }

    /// Withdraw `exposed` from the allow-list, the sandbox globals and the
    /// sandbox's `package.loaded`.
    ///
    /// This only stops future lookups. Sandboxed code that already holds the
    /// value, in a local or inside another loaded module, keeps it.
    pub fn remove(&self, exposed: &str) -> Result<()> {
        self.state.remove(exposed)
    }

    /// The allow-list.
    pub fn permit(&self) -> &AllowList {
        &self.state.permit
    }

    /// The sandbox global table.
    pub fn sandbox(&self) -> &Table {
        &self.state.sandbox
    }

    /// The sandbox module loader.
    pub fn loader(&self) -> &ModuleLoader {
        &self.state.loader
    }

    /// Everything sandboxed code printed so far.
    pub fn output(&self) -> &CapturedOutput {
        &self.state.output
    }

    /// The interpreter this sandbox lives in.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Memory used by the interpreter against the configured limit.
    pub fn memory_usage(&self) -> MemoryUsage {
        limits::memory_usage(&self.lua, self.state.max_memory)
    }

    /// Expose the admin operations to privileged Lua code as host module
    /// `name`, with fields `require`, `allow`, `remove`, `permitted` and
    /// `sandbox`.
    pub fn install_admin_module(&self, name: &str) -> Result<Table> {
        let lua = &self.lua;
        let module = lua.create_table()?;

        let state = Rc::clone(&self.state);
        module.set(
            "require",
            lua.create_function(move |lua, args: MultiValue| {
                let args = args.into_vec();
                let module = check_name(lua, &args, 1, "require")?;
                let exposed = opt_name(lua, &args, 2, "require")?;
                Ok(state.require(lua, &module, exposed.as_deref())?)
            })?,
        )?;

        let state = Rc::clone(&self.state);
        module.set(
            "allow",
            lua.create_function(move |lua, args: MultiValue| {
                let args = args.into_vec();
                let module = check_name(lua, &args, 1, "allow")?;
                let exposed = opt_name(lua, &args, 2, "allow")?;
                Ok(state.allow(lua, &module, exposed.as_deref())?)
            })?,
        )?;

        let state = Rc::clone(&self.state);
        module.set(
            "remove",
            lua.create_function(move |lua, args: MultiValue| {
                let args = args.into_vec();
                let exposed = check_name(lua, &args, 1, "remove")?;
                Ok(state.remove(&exposed)?)
            })?,
        )?;

        let permit = self.state.permit.clone();
        module.set(
            "permitted",
            lua.create_function(move |_, ()| Ok(permit.names()))?,
        )?;

        module.set("sandbox", self.state.sandbox.clone())?;

        host::register_module(lua, name, module.clone())?;
        Ok(module)
    }
}
