//! Error handling example.
//!
//! Shows how sandbox failures surface to the host and how sandboxed code
//! sees them through `pcall`.
//!
//! Run with: cargo run --example error_handling

use lua_trusted_sandbox::prelude::*;
use mlua::Lua;

fn open() -> Result<(Lua, Trusted)> {
    let lua = Lua::new();
    for name in ["host.spi", "host.pgtype", "host.server", "host.numeric"] {
        register_module(&lua, name, lua.create_table()?)?;
    }
    let config = SandboxConfig::builder()
        .echo_print(false)
        .max_memory(16 * 1024 * 1024)
        .build()?;
    let trusted = Trusted::open(&lua, config)?;
    Ok((lua, trusted))
}

fn classify(trusted: &Trusted, code: &str) -> String {
    match trusted.execute(code) {
        Ok(_) => "Success".to_string(),
        Err(e) if e.is_module_not_found() => "Module not found".to_string(),
        Err(e) if e.is_argument() => "Bad argument".to_string(),
        Err(e) if e.is_searcher_contract() => "Searcher contract violation".to_string(),
        Err(e) if e.is_memory_limit() => "Memory limit".to_string(),
        Err(e) => format!("Lua error: {}", e),
    }
}

fn main() -> Result<()> {
    println!("=== Error Handling Example ===\n");

    let (_lua, trusted) = open()?;

    println!("--- Test 1: Missing module ---");
    if let Err(e) = trusted.execute("return require('io')") {
        println!("Caught: {}", e.classify());
    }
    println!();

    println!("--- Test 2: Missing module inside pcall ---");
    let result = trusted.execute("local ok, err = pcall(require, 'socket') return ok, err")?;
    println!("values: {:?}", result.values);
    println!();

    println!("--- Test 3: Bad argument ---");
    if let Err(e) = trusted.execute("return require(nil)") {
        println!("Caught: {}", e.classify());
    }
    println!();

    println!("--- Test 4: Binary chunk ---");
    let result = trusted.execute("return load(string.dump(print))")?;
    println!("values: {:?}", result.values);
    println!();

    println!("--- Test 5: Loader error keeps its value ---");
    let result = trusted.execute(
        r#"
package.preload.broken = function() error({ code = 42 }) end
local ok, err = pcall(require, "broken")
return ok, err.code
"#,
    )?;
    println!("values: {:?}", result.values);
    println!();

    println!("--- Test 6: Output printed before a failure ---");
    if let Err(e) = trusted.execute("print('loading') print('almost') error('gave up')") {
        println!("Caught: {}", e);
        println!("Printed first: {:?}", e.output().unwrap_or_default());
    }
    println!();

    println!("--- Test 7: Error classification ---");
    let test_cases = [
        ("print(42)", "Simple print"),
        ("require('debug')", "Blocked library"),
        ("require(true)", "Wrong argument type"),
        ("package.preload.x = 1 require('x')", "Bad preload entry"),
        ("local t = {} while true do t[#t + 1] = {} end", "Runaway allocation"),
        ("error('boom')", "Script error"),
    ];

    println!("Classification results:");
    for (code, description) in test_cases {
        let (_lua, trusted) = open()?;
        println!("  {}: {}", description, classify(&trusted, code));
    }

    println!("\n=== Error Handling Example Complete ===");
    Ok(())
}
