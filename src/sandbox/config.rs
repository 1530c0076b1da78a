//! Sandbox configuration with builder pattern.

use crate::error::{Result, SandboxError};

/// Base library functions copied into every sandbox.
pub const DEFAULT_BUILTINS: &[&str] = &[
    "assert",
    "collectgarbage",
    "error",
    "getmetatable",
    "ipairs",
    "next",
    "pairs",
    "rawequal",
    "rawlen",
    "rawget",
    "rawset",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
];

/// General purpose libraries bound as sandbox globals.
pub const DEFAULT_LIBRARIES: &[&str] = &["coroutine", "string", "utf8", "table", "math"];

/// `os` functions that only read the clock or format dates.
pub const READ_ONLY_OS_FUNCTIONS: &[&str] = &["date", "clock", "time", "difftime"];

/// A module to admit into the sandbox, optionally under another name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBinding {
    /// Name the privileged `require` resolves.
    pub module: String,
    /// Name visible inside the sandbox; defaults to `module`.
    pub exposed: Option<String>,
}

impl ModuleBinding {
    /// Admit `module` under its own name.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            exposed: None,
        }
    }

    /// Admit `module` under `exposed`.
    pub fn renamed(module: impl Into<String>, exposed: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            exposed: Some(exposed.into()),
        }
    }

    /// The name sandboxed code sees.
    pub fn exposed_name(&self) -> &str {
        self.exposed.as_deref().unwrap_or(&self.module)
    }
}

/// Configuration for the trusted sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Base functions copied from the host globals.
    pub builtins: Vec<String>,
    /// Libraries allowed and bound as globals.
    pub libraries: Vec<ModuleBinding>,
    /// Host service modules allowed and bound as globals.
    pub host_services: Vec<ModuleBinding>,
    /// Modules only reachable through the sandbox `require`.
    pub allowed: Vec<ModuleBinding>,
    /// Functions of the restricted `os` library.
    pub os_functions: Vec<String>,
    /// Value of `_HOSTVERSION` inside the sandbox.
    pub host_version: String,
    /// Maximum interpreter memory in bytes.
    pub max_memory: Option<usize>,
    /// Also log every line printed by sandboxed code.
    pub echo_print: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            builtins: DEFAULT_BUILTINS.iter().map(|s| s.to_string()).collect(),
            libraries: DEFAULT_LIBRARIES.iter().map(|s| ModuleBinding::new(*s)).collect(),
            host_services: vec![
                ModuleBinding::renamed("host.spi", "spi"),
                ModuleBinding::renamed("host.pgtype", "pgtype"),
                ModuleBinding::renamed("host.server", "server"),
            ],
            allowed: vec![ModuleBinding::new("host.numeric")],
            os_functions: READ_ONLY_OS_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
            host_version: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            max_memory: None,
            echo_print: true,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Check names and the restricted `os` function list.
    pub fn validate(&self) -> Result<()> {
        let bindings = self
            .libraries
            .iter()
            .chain(&self.host_services)
            .chain(&self.allowed);
        for binding in bindings {
            if binding.module.is_empty() || binding.exposed_name().is_empty() {
                return Err(SandboxError::Config(format!(
                    "empty module name in binding {:?}",
                    binding
                )));
            }
        }

        if let Some(name) = self.builtins.iter().find(|name| name.is_empty()) {
            return Err(SandboxError::Config(format!("empty builtin name {:?}", name)));
        }

        for name in &self.os_functions {
            if !READ_ONLY_OS_FUNCTIONS.contains(&name.as_str()) {
                return Err(SandboxError::Config(format!(
                    "os.{} is not a read-only clock function",
                    name
                )));
            }
        }

        if self.max_memory == Some(0) {
            return Err(SandboxError::Config("max_memory must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    builtins: Option<Vec<String>>,
    libraries: Option<Vec<ModuleBinding>>,
    host_services: Option<Vec<ModuleBinding>>,
    allowed: Option<Vec<ModuleBinding>>,
    os_functions: Option<Vec<String>>,
    host_version: Option<String>,
    max_memory: Option<usize>,
    echo_print: Option<bool>,
}

impl SandboxConfigBuilder {
    /// Replace the builtin whitelist.
    pub fn builtins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builtins = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the libraries bound as globals.
    pub fn libraries(mut self, libraries: Vec<ModuleBinding>) -> Self {
        self.libraries = Some(libraries);
        self
    }

    /// Replace the host service modules bound as globals.
    pub fn host_services(mut self, services: Vec<ModuleBinding>) -> Self {
        self.host_services = Some(services);
        self
    }

    /// Replace the allow-only modules.
    pub fn allowed(mut self, allowed: Vec<ModuleBinding>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Replace the restricted `os` function list.
    pub fn os_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.os_functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the `_HOSTVERSION` string.
    pub fn host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = Some(version.into());
        self
    }

    /// Set the maximum memory limit in bytes.
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Choose whether printed lines are also logged.
    pub fn echo_print(mut self, echo: bool) -> Self {
        self.echo_print = Some(echo);
        self
    }

    /// Build and validate the SandboxConfig.
    pub fn build(self) -> Result<SandboxConfig> {
        let default = SandboxConfig::default();
        let config = SandboxConfig {
            builtins: self.builtins.unwrap_or(default.builtins),
            libraries: self.libraries.unwrap_or(default.libraries),
            host_services: self.host_services.unwrap_or(default.host_services),
            allowed: self.allowed.unwrap_or(default.allowed),
            os_functions: self.os_functions.unwrap_or(default.os_functions),
            host_version: self.host_version.unwrap_or(default.host_version),
            max_memory: self.max_memory.or(default.max_memory),
            echo_print: self.echo_print.unwrap_or(default.echo_print),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.builtins.len(), 16);
        assert_eq!(config.libraries.len(), 5);
        assert_eq!(
            config
                .host_services
                .iter()
                .map(ModuleBinding::exposed_name)
                .collect::<Vec<_>>(),
            vec!["spi", "pgtype", "server"]
        );
        assert_eq!(config.allowed, vec![ModuleBinding::new("host.numeric")]);
        assert!(config.max_memory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .host_services(vec![])
            .allowed(vec![ModuleBinding::renamed("app.json", "json")])
            .max_memory(8 * 1024 * 1024)
            .host_version("host 2.0")
            .build()
            .unwrap();

        assert!(config.host_services.is_empty());
        assert_eq!(config.allowed[0].exposed_name(), "json");
        assert_eq!(config.max_memory, Some(8 * 1024 * 1024));
        assert_eq!(config.host_version, "host 2.0");
        assert_eq!(config.libraries.len(), 5);
    }

    #[test]
    fn test_builder_rejects_writable_os_functions() {
        let err = SandboxConfig::builder()
            .os_functions(["time", "execute"])
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::Config(ref msg) if msg.contains("os.execute")));
    }

    #[test]
    fn test_builder_rejects_empty_names() {
        let result = SandboxConfig::builder()
            .allowed(vec![ModuleBinding::renamed("app.json", "")])
            .build();
        assert!(result.is_err());

        let result = SandboxConfig::builder().max_memory(0).build();
        assert!(result.is_err());
    }
}
