//! The restricted `os` library.

use mlua::{Function, Lua, Table, Value};

use crate::error::{Result, SandboxError};

/// Name the restricted library is registered under in the host.
pub const TRUSTED_OS_MODULE: &str = "trusted.os";

/// Build a fresh `os` table holding only `functions`, taken from the host's
/// `os` library.
pub fn open_restricted(lua: &Lua, functions: &[String]) -> Result<Table> {
    let host_os: Table = match lua.globals().get::<Value>("os")? {
        Value::Table(os) => os,
        _ => {
            return Err(SandboxError::Config(
                "host interpreter has no os library".to_string(),
            ))
        }
    };

    let os = lua.create_table_with_capacity(0, functions.len())?;
    for name in functions {
        let func: Function = host_os.get(name.as_str()).map_err(|_| {
            SandboxError::Config(format!("host os library has no function '{}'", name))
        })?;
        os.set(name.as_str(), func)?;
    }
    Ok(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::config::READ_ONLY_OS_FUNCTIONS;

    #[test]
    fn test_only_listed_functions() {
        let lua = Lua::new();
        let functions: Vec<String> = READ_ONLY_OS_FUNCTIONS.iter().map(|s| s.to_string()).collect();
        let os = open_restricted(&lua, &functions).unwrap();

        let mut names: Vec<String> = os
            .pairs::<String, Value>()
            .map(|pair| pair.unwrap().0)
            .collect();
        names.sort();
        assert_eq!(names, vec!["clock", "date", "difftime", "time"]);

        let now: i64 = os.get::<Function>("time").unwrap().call(()).unwrap();
        assert!(now > 0);
    }

    #[test]
    fn test_missing_host_function() {
        let lua = Lua::new();
        let err = open_restricted(&lua, &["no_such".to_string()]).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }
}
