//! Resource limiting for the Lua interpreter.

use mlua::Lua;

use crate::error::{Result, SandboxError};

/// Memory accounting of an interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes currently allocated by Lua.
    pub used: usize,
    /// Configured maximum, if any.
    pub limit: Option<usize>,
}

impl MemoryUsage {
    /// Bytes left before the limit, if one is set.
    pub fn remaining(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Apply the configured memory limit.
pub fn apply_memory_limit(lua: &Lua, max_memory: Option<usize>) -> Result<()> {
    let Some(bytes) = max_memory else {
        return Ok(());
    };

    if lua.used_memory() >= bytes {
        return Err(SandboxError::MemoryLimitExceeded(format!(
            "interpreter already uses {} bytes, limit is {}",
            lua.used_memory(),
            bytes
        )));
    }

    lua.set_memory_limit(bytes).map_err(|e| {
        SandboxError::RuntimeInit(anyhow::anyhow!("failed to set memory limit: {}", e))
    })?;
    Ok(())
}

/// Current memory usage against `limit`.
pub fn memory_usage(lua: &Lua, limit: Option<usize>) -> MemoryUsage {
    MemoryUsage {
        used: lua.used_memory(),
        limit,
    }
}

/// Turn Lua memory errors into [`SandboxError::MemoryLimitExceeded`].
pub fn check_memory_error(err: SandboxError) -> SandboxError {
    if err.is_memory_limit() && !matches!(err, SandboxError::MemoryLimitExceeded(_)) {
        return SandboxError::MemoryLimitExceeded(err.to_string());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_limit_is_a_no_op() {
        let lua = Lua::new();
        apply_memory_limit(&lua, None).unwrap();
        assert_eq!(memory_usage(&lua, None).remaining(), None);
    }

    #[test]
    fn test_limit_stops_allocation() {
        let lua = Lua::new();
        let limit = lua.used_memory() + 256 * 1024;
        apply_memory_limit(&lua, Some(limit)).unwrap();

        let err = lua
            .load("local t = {} for i = 1, 1e7 do t[i] = ('x'):rep(64) .. i end")
            .exec()
            .unwrap_err();
        let err = check_memory_error(SandboxError::from(err));
        assert!(matches!(err, SandboxError::MemoryLimitExceeded(_)));
    }

    #[test]
    fn test_limit_below_current_usage() {
        let lua = Lua::new();
        let err = apply_memory_limit(&lua, Some(1)).unwrap_err();
        assert!(err.is_memory_limit());
    }

    #[test]
    fn test_remaining() {
        let usage = MemoryUsage {
            used: 100,
            limit: Some(150),
        };
        assert_eq!(usage.remaining(), Some(50));
    }
}
