//! `sluice config`: print the resolved configuration.
//!
//! The mode defaults to development, as for `sluice dev`.

use super::Context;
use miette::{IntoDiagnostic, Result};
use sluice_core::BuildMode;

pub fn run(ctx: &Context) -> Result<()> {
    let config = ctx.resolve(BuildMode::Development)?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&config).into_diagnostic()?);
        return Ok(());
    }

    let build = &config.build;
    let server = &config.server;
    let formats: Vec<&str> = build.lib.formats.iter().map(|f| f.as_str()).collect();

    println!("mode        {}", config.mode.as_str());
    println!("root        {}", build.root.display());
    println!("entry       {}", build.entry.display());
    println!("lib         {} ({})", build.lib.name, formats.join(", "));
    println!("out_dir     {}", build.out_dir.display());
    println!("minify      {}", build.minify);
    println!("sourcemap   {}", build.sourcemap);
    for (alias, target) in &build.alias {
        println!("alias       {alias} -> {target}");
    }
    println!(
        "server      {}:{}{}",
        server.host,
        server.port,
        if server.strict_port { " (strict port)" } else { "" }
    );
    for rule in &server.proxy {
        let origin = if rule.change_origin { " (change origin)" } else { "" };
        println!("proxy       {} -> {}{origin}", rule.prefix, rule.target);
    }
    if let Some(public) = &server.public_dir {
        println!("public_dir  {}", public.display());
    }

    Ok(())
}
