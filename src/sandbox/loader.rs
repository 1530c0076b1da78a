//! The sandbox module system: `require`, its searchers and `package`.
//!
//! Resolution checks `package.loaded` first, then walks a fixed chain of two
//! searchers: the sandbox's own `package.preload`, then the host's
//! allow-list. The chain is held on the Rust side, so sandboxed code has no
//! `package.searchers` to tamper with.
//!
//! Module names are Lua strings and need not be valid UTF-8. Only the
//! allow-list, whose names come from the host, is keyed by `String`.

use std::rc::Rc;

use mlua::{Function, Lua, MultiValue, String as LuaString, Table, Value};

use crate::error::{Result, SandboxError};
use crate::sandbox::cache::LoadedCache;
use crate::sandbox::permit::AllowList;

/// A way to produce a module's value.
#[derive(Debug, Clone)]
pub enum Loader {
    /// A loader function still to be run with `(name, extra)`.
    Pending {
        /// The loader.
        func: Function,
        /// Auxiliary data returned by the searcher.
        extra: Value,
    },
    /// A value resolved ahead of time; loading it runs no code.
    Resolved(Value),
}

/// Where a `require` stands after the cache and the searchers were asked.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The module value, already recorded in `package.loaded`.
    Ready(Value),
    /// A loader that still has to run; pass its result to
    /// [`ModuleLoader::finish`].
    Pending {
        /// The loader.
        func: Function,
        /// Auxiliary data for the loader.
        extra: Value,
    },
}

/// What a searcher found for a name.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// A loader for the module.
    Found(Loader),
    /// Why this searcher could not help; appended to the not-found error.
    NotFound(String),
}

/// One resolution strategy of the search chain.
pub trait Searcher {
    /// Look for `name`.
    fn search(&self, name: &LuaString) -> Result<SearchOutcome>;
}

/// Searches the sandbox's `package.preload` table.
#[derive(Debug, Clone)]
pub struct PreloadSearcher {
    package: Table,
}

impl PreloadSearcher {
    /// Search `package.preload` of the given sandbox `package` table.
    pub fn new(package: Table) -> Self {
        Self { package }
    }
}

impl Searcher for PreloadSearcher {
    fn search(&self, name: &LuaString) -> Result<SearchOutcome> {
        let preload = match self.package.get::<Value>("preload")? {
            Value::Table(preload) => preload,
            other => {
                return Err(SandboxError::SearcherContract(format!(
                    "package.preload must be a table, got {}",
                    other.type_name()
                )))
            }
        };

        match preload.get::<Value>(name.clone())? {
            Value::Nil => Ok(SearchOutcome::NotFound(format!(
                "\n\tno field package.preload['{}']",
                name.to_string_lossy()
            ))),
            Value::Function(func) => Ok(SearchOutcome::Found(Loader::Pending {
                func,
                extra: Value::Nil,
            })),
            other => Err(SandboxError::SearcherContract(format!(
                "package.preload['{}'] is a {}, not a loader function",
                name.to_string_lossy(),
                other.type_name()
            ))),
        }
    }
}

/// Searches the host's allow-list.
#[derive(Debug, Clone)]
pub struct AllowListSearcher {
    permit: AllowList,
}

impl AllowListSearcher {
    /// Search the given allow-list.
    pub fn new(permit: AllowList) -> Self {
        Self { permit }
    }
}

impl Searcher for AllowListSearcher {
    fn search(&self, name: &LuaString) -> Result<SearchOutcome> {
        // Allowed names are host strings, so a name that is not UTF-8 never matches.
        let permit = match name.to_str() {
            Ok(name) => self.permit.get(&name),
            Err(_) => None,
        };
        Ok(match permit {
            Some(permit) => SearchOutcome::Found(Loader::Resolved(permit.into_value())),
            None => SearchOutcome::NotFound(format!(
                "\n\tno module '{}' in list of allowed modules",
                name.to_string_lossy()
            )),
        })
    }
}

/// The fixed preload-then-allow-list search order.
#[derive(Debug, Clone)]
pub struct SearcherChain {
    preload: PreloadSearcher,
    allowed: AllowListSearcher,
}

impl SearcherChain {
    /// Create the chain for a sandbox `package` table and allow-list.
    pub fn new(package: Table, permit: AllowList) -> Self {
        Self {
            preload: PreloadSearcher::new(package),
            allowed: AllowListSearcher::new(permit),
        }
    }

    fn searchers(&self) -> [&dyn Searcher; 2] {
        [&self.preload, &self.allowed]
    }

    /// Find the first loader for `name`.
    pub fn find(&self, name: &LuaString) -> Result<Loader> {
        let mut diagnostics = String::new();
        for searcher in self.searchers() {
            match searcher.search(name)? {
                SearchOutcome::Found(loader) => return Ok(loader),
                SearchOutcome::NotFound(message) => diagnostics.push_str(&message),
            }
        }
        Err(SandboxError::ModuleNotFound {
            name: name.to_string_lossy().into(),
            diagnostics,
        })
    }
}

/// Resolves module names for one sandbox.
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    cache: LoadedCache,
    chain: SearcherChain,
}

impl ModuleLoader {
    /// Create a loader over the sandbox `package` table.
    pub fn new(package: Table, cache: LoadedCache, permit: AllowList) -> Self {
        Self {
            cache,
            chain: SearcherChain::new(package, permit),
        }
    }

    /// Check the cache, then the searchers.
    ///
    /// Allow-listed values are recorded right away; a preload loader is
    /// returned for the caller to run.
    pub fn resolve(&self, name: &LuaString) -> Result<Resolution> {
        if let Some(value) = self.cache.get(name.clone())? {
            tracing::trace!(module = %name.to_string_lossy(), "module cache hit");
            return Ok(Resolution::Ready(value));
        }

        match self.chain.find(name)? {
            Loader::Resolved(value) => Ok(Resolution::Ready(self.finish(name, value)?)),
            Loader::Pending { func, extra } => Ok(Resolution::Pending { func, extra }),
        }
    }

    /// Record what a loader produced. A loader returning nothing counts as
    /// having loaded `true`.
    pub fn finish(&self, name: &LuaString, value: Value) -> Result<Value> {
        let value = match value {
            Value::Nil => Value::Boolean(true),
            value => value,
        };
        self.cache.store(name.clone(), value.clone())?;
        tracing::trace!(module = %name.to_string_lossy(), "module resolved");
        Ok(value)
    }

    /// Resolve `name` the way the sandbox `require` does, running a preload
    /// loader from Rust if one is found.
    pub fn require(&self, lua: &Lua, name: &str) -> Result<Value> {
        let name = lua.create_string(name)?;
        match self.resolve(&name)? {
            Resolution::Ready(value) => Ok(value),
            Resolution::Pending { func, extra } => {
                let value = func.call::<Value>((name.clone(), extra))?;
                self.finish(&name, value)
            }
        }
    }

    /// The `package.loaded` cache.
    pub fn cache(&self) -> &LoadedCache {
        &self.cache
    }
}

/// Build the sandbox `package` table and its `require`.
///
/// The table holds `loaded`, `preload` and `require`; the returned loader
/// serves lookups for it.
pub fn open_package(lua: &Lua, permit: AllowList) -> Result<(Table, Rc<ModuleLoader>)> {
    let package = lua.create_table()?;
    let cache = LoadedCache::new(lua)?;
    package.set("loaded", cache.table().clone())?;
    package.set("preload", lua.create_table()?)?;

    let loader = Rc::new(ModuleLoader::new(package.clone(), cache, permit));
    let require = require_function(lua, Rc::clone(&loader))?;
    package.set("require", require)?;

    Ok((package, loader))
}

// Loaders run from Lua so their errors reach the caller untouched and they
// may yield.
const REQUIRE_SOURCE: &str = r#"
local resolve, finish = ...
return function(...)
    local name, ready, value, extra = resolve(...)
    if ready then
        return value
    end
    return finish(name, (value(name, extra)))
end
"#;

fn require_function(lua: &Lua, loader: Rc<ModuleLoader>) -> Result<Function> {
    let resolver = Rc::clone(&loader);
    let resolve = lua.create_function(move |lua, args: MultiValue| {
        let args = args.into_vec();
        let name = check_string(lua, &args, 1, "require")?;
        Ok(match resolver.resolve(&name)? {
            Resolution::Ready(value) => (name, true, value, Value::Nil),
            Resolution::Pending { func, extra } => (name, false, Value::Function(func), extra),
        })
    })?;
    let finish = lua.create_function(move |_, (name, value): (LuaString, Value)| {
        Ok(loader.finish(&name, value)?)
    })?;

    let require: Function = lua
        .load(REQUIRE_SOURCE)
        .set_name("=trusted.require")
        .call((resolve, finish))?;
    Ok(require)
}

/// Read argument `position` as a string, coercing numbers.
pub(crate) fn check_string(
    lua: &Lua,
    args: &[Value],
    position: usize,
    function: &'static str,
) -> Result<LuaString> {
    let value = match args.get(position - 1) {
        Some(value) => value.clone(),
        None => {
            return Err(SandboxError::argument(
                function,
                position,
                "string expected, got no value",
            ))
        }
    };

    match value {
        Value::String(s) => Ok(s),
        Value::Integer(_) | Value::Number(_) => match lua.coerce_string(value)? {
            Some(s) => Ok(s),
            None => Err(SandboxError::argument(function, position, "string expected")),
        },
        other => Err(SandboxError::argument(
            function,
            position,
            format!("string expected, got {}", other.type_name()),
        )),
    }
}

/// Read an optional string argument; `nil` and a missing argument are `None`.
pub(crate) fn opt_string(
    lua: &Lua,
    args: &[Value],
    position: usize,
    function: &'static str,
) -> Result<Option<LuaString>> {
    match args.get(position - 1) {
        None | Some(Value::Nil) => Ok(None),
        Some(_) => check_string(lua, args, position, function).map(Some),
    }
}

/// Like [`check_string`], for names that must also be valid UTF-8.
pub(crate) fn check_name(
    lua: &Lua,
    args: &[Value],
    position: usize,
    function: &'static str,
) -> Result<String> {
    let name = check_string(lua, args, position, function)?;
    utf8_name(&name, position, function)
}

/// Like [`opt_string`], for names that must also be valid UTF-8.
pub(crate) fn opt_name(
    lua: &Lua,
    args: &[Value],
    position: usize,
    function: &'static str,
) -> Result<Option<String>> {
    match opt_string(lua, args, position, function)? {
        Some(name) => utf8_name(&name, position, function).map(Some),
        None => Ok(None),
    }
}

fn utf8_name(name: &LuaString, position: usize, function: &'static str) -> Result<String> {
    match name.to_str() {
        Ok(name) => Ok(str::to_owned(&name)),
        Err(_) => Err(SandboxError::argument(
            function,
            position,
            "name is not valid UTF-8",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::permit::Permit;
    use std::cell::Cell;

    fn loader_with(lua: &Lua, permit: &AllowList) -> (Table, Rc<ModuleLoader>) {
        open_package(lua, permit.clone()).unwrap()
    }

    #[test]
    fn test_not_found_lists_both_searchers() {
        let lua = Lua::new();
        let (_, loader) = loader_with(&lua, &AllowList::new());

        let err = loader.require(&lua, "json").unwrap_err();
        assert_eq!(
            err.to_string(),
            "module 'json' not found:\n\tno field package.preload['json']\n\tno module 'json' in list of allowed modules"
        );
    }

    #[test]
    fn test_preload_wins_over_allow_list() {
        let lua = Lua::new();
        let permit = AllowList::new();
        permit.insert("m", Permit::Resolved(Value::Integer(2)));
        let (package, loader) = loader_with(&lua, &permit);

        let preload: Table = package.get("preload").unwrap();
        preload
            .set("m", lua.create_function(|_, ()| Ok(1)).unwrap())
            .unwrap();

        assert!(matches!(loader.require(&lua, "m").unwrap(), Value::Integer(1)));
    }

    #[test]
    fn test_loader_receives_name_and_nil_becomes_true() {
        let lua = Lua::new();
        let (package, loader) = loader_with(&lua, &AllowList::new());
        let seen = Rc::new(Cell::new(false));

        let seen_in_loader = Rc::clone(&seen);
        let func = lua
            .create_function(move |_, (name, extra): (String, Value)| {
                seen_in_loader.set(name == "side.effect" && extra.is_nil());
                Ok(())
            })
            .unwrap();
        let preload: Table = package.get("preload").unwrap();
        preload.set("side.effect", func).unwrap();

        assert!(matches!(
            loader.require(&lua, "side.effect").unwrap(),
            Value::Boolean(true)
        ));
        assert!(seen.get());
        assert!(loader.cache().contains("side.effect").unwrap());
    }

    #[test]
    fn test_cache_hit_skips_loader() {
        let lua = Lua::new();
        let (package, loader) = loader_with(&lua, &AllowList::new());
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        let func = lua
            .create_function(move |lua, ()| {
                counter.set(counter.get() + 1);
                lua.create_table()
            })
            .unwrap();
        let preload: Table = package.get("preload").unwrap();
        preload.set("m", func).unwrap();

        let first = loader.require(&lua, "m").unwrap();
        let second = loader.require(&lua, "m").unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_function_preload_breaks_contract() {
        let lua = Lua::new();
        let (package, loader) = loader_with(&lua, &AllowList::new());
        let preload: Table = package.get("preload").unwrap();
        preload.set("m", 42).unwrap();

        assert!(loader.require(&lua, "m").unwrap_err().is_searcher_contract());

        package.set("preload", "nope").unwrap();
        assert!(loader.require(&lua, "other").unwrap_err().is_searcher_contract());
    }

    #[test]
    fn test_check_string() {
        let lua = Lua::new();
        let args = vec![
            Value::String(lua.create_string("mod").unwrap()),
            Value::Integer(3),
            Value::Boolean(true),
        ];

        assert_eq!(check_string(&lua, &args, 1, "require").unwrap(), "mod");
        assert_eq!(check_string(&lua, &args, 2, "require").unwrap(), "3");
        assert_eq!(check_name(&lua, &args, 2, "allow").unwrap(), "3");

        let err = check_string(&lua, &args, 3, "require").unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad argument #3 to 'require' (string expected, got boolean)"
        );

        let err = check_string(&lua, &args, 4, "require").unwrap_err();
        assert!(err.to_string().contains("got no value"));

        assert!(opt_string(&lua, &args, 4, "allow").unwrap().is_none());
        assert_eq!(opt_name(&lua, &args, 4, "allow").unwrap(), None);
    }

    #[test]
    fn test_names_need_not_be_utf8() {
        let lua = Lua::new();
        let permit = AllowList::new();
        let (package, loader) = loader_with(&lua, &permit);
        let name = lua.create_string(b"\xffmod").unwrap();

        let err = loader.resolve(&name).unwrap_err();
        assert!(err.is_module_not_found());
        assert!(err.to_string().contains("no field package.preload['\u{fffd}mod']"));

        let preload: Table = package.get("preload").unwrap();
        preload
            .set(name.clone(), lua.create_function(|_, ()| Ok(5)).unwrap())
            .unwrap();
        let Resolution::Pending { func, extra } = loader.resolve(&name).unwrap() else {
            panic!("expected a pending loader");
        };
        let value = func.call::<Value>((name.clone(), extra)).unwrap();
        assert!(matches!(loader.finish(&name, value).unwrap(), Value::Integer(5)));
        assert!(loader.cache().contains(name).unwrap());
    }

    #[test]
    fn test_names_for_the_host_must_be_utf8() {
        let lua = Lua::new();
        let args = vec![Value::String(lua.create_string(b"\xffmod").unwrap())];

        assert!(check_string(&lua, &args, 1, "allow").is_ok());
        let err = check_name(&lua, &args, 1, "allow").unwrap_err();
        assert!(err.is_argument());
        assert_eq!(
            err.to_string(),
            "bad argument #1 to 'allow' (name is not valid UTF-8)"
        );
    }
}
