//! Error types for the trusted sandbox.

use thiserror::Error;

/// Errors that can occur while building or using the sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// A sandbox or admin function was called with a bad argument.
    #[error("bad argument #{position} to '{function}' ({message})")]
    Argument {
        /// Name of the function as seen by Lua code.
        function: &'static str,
        /// One-based argument position.
        position: usize,
        /// What was wrong with the argument.
        message: String,
    },

    /// No searcher could resolve the module.
    ///
    /// The message carries the rejection reason of every searcher, in
    /// search order.
    #[error("module '{name}' not found:{diagnostics}")]
    ModuleNotFound {
        /// The requested module name.
        name: String,
        /// Concatenated searcher diagnostics.
        diagnostics: String,
    },

    /// A searcher broke the search contract. This is a configuration
    /// problem, and protected calls inside the sandbox do not catch it.
    #[error("searcher contract violated: {0}")]
    SearcherContract(String),

    /// An error raised by Lua code, propagated unchanged.
    #[error(transparent)]
    Script(#[from] mlua::Error),

    /// The interpreter ran past its memory limit.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// Failed to prepare the interpreter.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A sandboxed run failed. Carries whatever the run printed before the
    /// failure.
    #[error("{source}")]
    Execution {
        /// The failure itself.
        source: Box<SandboxError>,
        /// Lines printed by the failed run.
        output: String,
    },
}

impl SandboxError {
    /// Build an argument error for `function`.
    pub fn argument(function: &'static str, position: usize, message: impl Into<String>) -> Self {
        SandboxError::Argument {
            function,
            position,
            message: message.into(),
        }
    }

    /// The typed sandbox error behind this one.
    ///
    /// Errors raised inside Lua come back wrapped in [`mlua::Error`]; this
    /// looks through the wrapping so callers can match on the original kind.
    pub fn classify(&self) -> &SandboxError {
        match self {
            SandboxError::Script(err) => find_sandbox_error(err).unwrap_or(self),
            SandboxError::Execution { source, .. } => source.classify(),
            _ => self,
        }
    }

    /// What a failed run printed before it failed.
    pub fn output(&self) -> Option<&str> {
        match self {
            SandboxError::Execution { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Check if this error is an argument error.
    pub fn is_argument(&self) -> bool {
        matches!(self.classify(), SandboxError::Argument { .. })
    }

    /// Check if this error reports an unresolved module.
    pub fn is_module_not_found(&self) -> bool {
        matches!(self.classify(), SandboxError::ModuleNotFound { .. })
    }

    /// Check if this error is a searcher contract violation.
    pub fn is_searcher_contract(&self) -> bool {
        matches!(self.classify(), SandboxError::SearcherContract(_))
    }

    /// Check if this error represents a memory limit exceeded.
    pub fn is_memory_limit(&self) -> bool {
        match self.classify() {
            SandboxError::MemoryLimitExceeded(_) => true,
            SandboxError::Script(err) => is_memory_error(err),
            _ => false,
        }
    }

    /// Fatal errors must not be turned into values by a protected call.
    pub fn is_fatal(&self) -> bool {
        self.is_searcher_contract() || self.is_memory_limit()
    }
}

impl From<SandboxError> for mlua::Error {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Script(err) => err,
            other => mlua::Error::external(other),
        }
    }
}

/// The message Lua raises when an allocation fails.
pub const LUA_MEMORY_ERROR: &str = "not enough memory";

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Find a [`SandboxError`] raised by one of our callbacks inside `err`.
pub fn find_sandbox_error(err: &mlua::Error) -> Option<&SandboxError> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<SandboxError>(),
        mlua::Error::CallbackError { cause, .. } => find_sandbox_error(cause),
        mlua::Error::WithContext { cause, .. } => find_sandbox_error(cause),
        _ => None,
    }
}

/// Check whether a Lua error must be re-raised past protected calls.
pub fn is_fatal_error(err: &mlua::Error) -> bool {
    match find_sandbox_error(err) {
        Some(sandbox_err) => sandbox_err.is_fatal(),
        None => is_memory_error(err),
    }
}

fn is_memory_error(err: &mlua::Error) -> bool {
    match err {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::RuntimeError(msg) => msg == LUA_MEMORY_ERROR,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        mlua::Error::WithContext { cause, .. } => is_memory_error(cause),
        _ => false,
    }
}
