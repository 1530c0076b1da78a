//! Running untrusted source text inside the sandbox.

use mlua::{ChunkMode, Function, MultiValue, Table, Value};

use crate::error::{Result, SandboxError};
use crate::sandbox::limits::check_memory_error;
use crate::sandbox::trusted::Trusted;

/// Result of a sandboxed execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Values returned by the chunk.
    pub values: Vec<Value>,
    /// Lines printed during this execution.
    pub output: String,
}

impl ExecutionResult {
    /// The first returned value, `nil` if there was none.
    pub fn first(&self) -> Value {
        self.values.first().cloned().unwrap_or(Value::Nil)
    }
}

impl Trusted {
    /// Compile `source` as a text chunk.
    ///
    /// The chunk's environment is the sandbox unless `env` is given. Binary
    /// chunks are never accepted.
    pub fn load(&self, source: &str, name: Option<&str>, env: Option<Table>) -> Result<Function> {
        let env = env.unwrap_or_else(|| self.sandbox().clone());
        let mut chunk = self
            .lua()
            .load(source)
            .set_mode(ChunkMode::Text)
            .set_environment(env);
        if let Some(name) = name {
            chunk = chunk.set_name(name);
        }
        Ok(chunk.into_function()?)
    }

    /// Compile and run untrusted `source` in the sandbox.
    pub fn execute(&self, source: &str) -> Result<ExecutionResult> {
        self.execute_named(source, "=sandbox")
    }

    /// Like [`Trusted::execute`], naming the chunk for error messages.
    ///
    /// A run that fails after it started returns
    /// [`SandboxError::Execution`], which keeps what the run printed.
    pub fn execute_named(&self, source: &str, name: &str) -> Result<ExecutionResult> {
        let mark = self.output().len();
        let func = self.load(source, Some(name), None)?;

        match func.call::<MultiValue>(()) {
            Ok(values) => Ok(ExecutionResult {
                values: values.into_vec(),
                output: self.output().since(mark),
            }),
            Err(err) => Err(SandboxError::Execution {
                source: Box::new(check_memory_error(err.into())),
                output: self.output().since(mark),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::config::SandboxConfig;
    use mlua::Lua;

    fn trusted() -> Trusted {
        let config = SandboxConfig::builder()
            .host_services(vec![])
            .allowed(vec![])
            .echo_print(false)
            .build()
            .unwrap();
        Trusted::open(&Lua::new(), config).unwrap()
    }

    #[test]
    fn test_simple_execution() {
        let trusted = trusted();
        let result = trusted.execute("print(1 + 1) return 'done', 3").unwrap();

        assert_eq!(result.output, "2\n");
        assert!(matches!(result.first(), Value::String(ref s) if s == "done"));
        assert_eq!(result.values.len(), 2);
    }

    #[test]
    fn test_output_is_per_execution() {
        let trusted = trusted();
        trusted.execute("print('first')").unwrap();
        let result = trusted.execute("print('second', nil)").unwrap();

        assert_eq!(result.output, "second\tnil\n");
        assert_eq!(trusted.output().contents(), "first\nsecond\tnil\n");
    }

    #[test]
    fn test_syntax_error() {
        let trusted = trusted();
        let err = trusted.execute("return +").unwrap_err();
        assert!(matches!(
            err,
            crate::error::SandboxError::Script(mlua::Error::SyntaxError { .. })
        ));
    }

    #[test]
    fn test_failed_run_keeps_its_output() {
        let trusted = trusted();
        trusted.execute("print('earlier')").unwrap();

        let err = trusted
            .execute("print('partial') print('work') error('boom')")
            .unwrap_err();
        assert_eq!(err.output(), Some("partial\nwork\n"));
        assert!(err.to_string().contains("boom"));
        assert_eq!(trusted.output().contents(), "earlier\npartial\nwork\n");
    }

    #[test]
    fn test_chunk_name_in_errors() {
        let trusted = trusted();
        let err = trusted
            .execute_named("error('boom')", "=user_function")
            .unwrap_err();
        assert!(err.to_string().contains("user_function"));
    }

    #[test]
    fn test_explicit_environment() {
        let trusted = trusted();
        let env = trusted.lua().create_table().unwrap();
        env.set("x", 10).unwrap();

        let func = trusted.load("return x, print", None, Some(env)).unwrap();
        let (x, print): (i64, Value) = func.call(()).unwrap();
        assert_eq!(x, 10);
        assert!(print.is_nil());
    }

    #[test]
    fn test_memory_limit() {
        let lua = Lua::new();
        let config = SandboxConfig::builder()
            .host_services(vec![])
            .allowed(vec![])
            .max_memory(lua.used_memory() + 2 * 1024 * 1024)
            .build()
            .unwrap();
        let trusted = Trusted::open(&lua, config).unwrap();

        let err = trusted
            .execute("local t = {} for i = 1, 1e8 do t[i] = string.rep('x', 64) .. i end")
            .unwrap_err();
        assert!(err.is_memory_limit());
        assert!(trusted.memory_usage().limit.is_some());
    }
}
