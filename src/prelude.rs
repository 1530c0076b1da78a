//! Prelude module for convenient imports.

pub use crate::error::{Result, SandboxError};
pub use crate::sandbox::{
    config::{ModuleBinding, SandboxConfig},
    executor::ExecutionResult,
    host::{preload_module, register_module},
    trusted::Trusted,
};
