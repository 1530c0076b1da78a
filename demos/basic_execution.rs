//! Basic example of executing Lua code in the trusted sandbox.
//!
//! Run with: cargo run --example basic_execution

use lua_trusted_sandbox::prelude::*;
use mlua::Lua;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lua_trusted_sandbox=info".into()),
        )
        .init();

    // The host registers its service modules before the sandbox is opened.
    let lua = Lua::new();
    for name in ["host.spi", "host.pgtype", "host.server", "host.numeric"] {
        let module = lua.create_table()?;
        module.set("name", name)?;
        register_module(&lua, name, module)?;
    }

    let config = SandboxConfig::builder()
        .host_version("demo 1.0")
        .max_memory(32 * 1024 * 1024)
        .build()?;

    println!("Opening sandbox with config: {:?}", config);
    let trusted = Trusted::open(&lua, config)?;

    println!("\n=== Test 1: Simple arithmetic ===");
    let result = trusted.execute("print(1 + 1) return _VERSION, _HOSTVERSION")?;
    println!("output: {}", result.output.trim_end());
    println!("values: {:?}", result.values);

    println!("\n=== Test 2: Loop with allowed libraries ===");
    let code = r#"
for i = 1, 5 do
    print(string.format("Count: %d", i))
end
"#;
    let result = trusted.execute(code)?;
    println!("output:\n{}", result.output);

    println!("\n=== Test 3: Host services ===");
    let result = trusted.execute("return spi.name, require('host.numeric').name, numeric")?;
    println!("values: {:?}", result.values);

    println!("\n=== Test 4: Admin interface ===");
    register_module(&lua, "app.config", lua.create_table_from([("mode", "strict")])?)?;
    trusted.install_admin_module("trusted")?;
    lua.load(r#"local trusted = require("trusted") trusted.allow("app.config", "config")"#)
        .exec()?;
    let result = trusted.execute("return require('config').mode")?;
    println!("values: {:?}", result.values);
    println!("permitted: {:?}", trusted.permit().names());

    let usage = trusted.memory_usage();
    println!("\nmemory used: {} bytes", usage.used);

    Ok(())
}
