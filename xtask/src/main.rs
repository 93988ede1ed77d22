use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "hook")]
    hooks: Vec<HookEntry>,
}

#[derive(Debug, Deserialize)]
struct HookEntry {
    id: u32,
    name: String,
    module: String,
    kind: String,
    #[serde(default)]
    symbol: String,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: cargo xtask <command>");
        eprintln!("Commands:");
        eprintln!("  gen-identifiers [manifest] [output]   Generate the hook identifier table");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "gen-identifiers" => gen_identifiers(
            args.get(2).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("bifrost-bootstrap/hooks.toml")),
            args.get(3)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("bifrost-bootstrap/src/identifiers_generated.rs")),
        ),
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(1);
        }
    }
}

fn gen_identifiers(manifest_path: PathBuf, output_path: PathBuf) -> Result<()> {
    let contents = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("reading manifest `{}`", manifest_path.display()))?;
    let manifest: Manifest = toml::from_str(&contents).context("parsing hook manifest")?;

    let mut seen = std::collections::HashSet::new();
    for hook in &manifest.hooks {
        if !seen.insert(hook.id) {
            anyhow::bail!("duplicate hook id {} in `{}`", hook.id, manifest_path.display());
        }
        if hook.kind != "cfunction" && hook.kind != "vtableslot" {
            anyhow::bail!("hook `{}`: unknown kind `{}` (expected cfunction or vtableslot)", hook.name, hook.kind);
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "// generated by `cargo xtask gen-identifiers` from {}. Do not edit by hand.", manifest_path.display());
    let _ = writeln!(out, "use bifrost_common::{{HookIdentifier, HookKind}};");
    let _ = writeln!(out);
    let _ = writeln!(out, "pub fn identifiers() -> Vec<HookIdentifier> {{");
    let _ = writeln!(out, "    vec![");
    for hook in &manifest.hooks {
        let kind = if hook.kind == "cfunction" { "CFunction" } else { "VTableSlot" };
        let _ = writeln!(out, "        HookIdentifier {{");
        let _ = writeln!(out, "            id: {},", hook.id);
        let _ = writeln!(out, "            name: {:?}.to_string(),", hook.name);
        let _ = writeln!(out, "            module: {:?}.to_string(),", hook.module);
        let _ = writeln!(out, "            kind: HookKind::{kind},");
        let _ = writeln!(out, "            symbol: {:?}.to_string(),", hook.symbol);
        let _ = writeln!(out, "        }},");
    }
    let _ = writeln!(out, "    ]");
    let _ = writeln!(out, "}}");

    std::fs::write(&output_path, out).with_context(|| format!("writing `{}`", output_path.display()))?;
    println!("wrote {} hook identifiers to {}", manifest.hooks.len(), output_path.display());
    Ok(())
}
