//! # Trusted Lua Sandbox
//!
//! A trust boundary for running untrusted Lua code inside a privileged host.
//!
//! The host opens a sandbox in an [`mlua::Lua`] interpreter and decides what
//! the untrusted code may reach:
//!
//! - **Restricted globals**: only vetted base functions, the version strings
//!   and safe replacements for `print`, `pcall`, `xpcall` and `load`
//! - **Text-only loading**: the sandbox `load` refuses precompiled chunks and
//!   defaults new chunks to the sandbox environment
//! - **Allow-listed modules**: sandboxed `require` only finds modules the host
//!   preloaded inside the sandbox or admitted through its allow-list
//! - **Memory limit**: optional cap on interpreter allocations
//!
//! ## Example
//!
//! ```rust,ignore
//! use lua_trusted_sandbox::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let lua = mlua::Lua::new();
//!     register_module(&lua, "host.spi", lua.create_table()?)?;
//!     register_module(&lua, "host.pgtype", lua.create_table()?)?;
//!     register_module(&lua, "host.server", lua.create_table()?)?;
//!     register_module(&lua, "host.numeric", lua.create_table()?)?;
//!
//!     let trusted = Trusted::open(&lua, SandboxConfig::default())?;
//!     trusted.allow("host.numeric", Some("numeric"))?;
//!
//!     let result = trusted.execute("local n = require 'numeric' print(type(n))")?;
//!     assert_eq!(result.output, "table\n");
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! The sandbox shares one interpreter with the host, so it is only as strong
//! as what the host admits:
//!
//! 1. **Namespace isolation**: untrusted chunks see the sandbox table as
//!    their globals, never the host's
//! 2. **Module admission**: the host resolves modules itself and hands the
//!    values over; sandboxed code cannot trigger host-side resolution
//! 3. **Best-effort removal**: `remove` blocks later lookups but does not
//!    revoke references the sandbox already holds
//! 4. **No OS isolation**: admitted modules run with the host's rights

pub mod error;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use error::{Result, SandboxError};
pub use sandbox::config::{ModuleBinding, SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::ExecutionResult;
pub use sandbox::permit::{AllowList, Permit};
pub use sandbox::trusted::Trusted;
