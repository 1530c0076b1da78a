//! Output capture for the sandbox `print`.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Function, Lua, MultiValue};

/// Log target used for lines printed by sandboxed code.
pub const PRINT_TARGET: &str = "lua_trusted_sandbox::print";

/// A buffer collecting everything sandboxed code prints.
///
/// Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    buffer: Rc<RefCell<String>>,
}

impl CapturedOutput {
    /// Create a new captured output buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one printed line.
    pub fn push_line(&self, line: &str) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push_str(line);
        buffer.push('\n');
    }

    /// Get the captured output as a string.
    pub fn contents(&self) -> String {
        self.buffer.borrow().clone()
    }

    /// Everything captured after byte `offset`.
    pub fn since(&self, offset: usize) -> String {
        self.buffer
            .borrow()
            .get(offset..)
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Clear the buffer.
    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create the sandbox `print`.
///
/// Arguments go through the host's `tostring` and are joined with tabs, like
/// the stock `print`, but the line lands in `output` (and optionally the log)
/// instead of the process stdout.
pub fn print_function(lua: &Lua, output: CapturedOutput, echo: bool) -> mlua::Result<Function> {
    let tostring: Function = lua.globals().get("tostring")?;
    lua.create_function(move |_, args: MultiValue| {
        let mut parts = Vec::with_capacity(args.len());
        for value in args {
            let text: mlua::String = tostring.call(value)?;
            parts.push(text.to_string_lossy());
        }
        let line = parts.join("\t");
        if echo {
            tracing::info!(target: PRINT_TARGET, "{}", line);
        }
        output.push_line(&line);
        Ok(())
    })
}
