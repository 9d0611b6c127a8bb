//! `modhost inspect` command implementation

use std::path::Path;

use colored::Colorize;
use modhost_kernel::{Scope, TypeDescriptor, TypeKind};
use modhost_runtime::Package;
use serde::Serialize;

use crate::output::{OutputFormat, list_or_none, print_json};

#[derive(Debug, Serialize)]
struct PackageSummary {
    path: String,
    digest: String,
    entry_point: Option<String>,
    version: Option<String>,
    exports: Vec<String>,
    requires: Vec<String>,
    types: Vec<TypeSummary>,
}

#[derive(Debug, Serialize)]
struct TypeSummary {
    name: String,
    kind: Option<TypeKind>,
    scope: Option<Scope>,
    execute: Option<String>,
    error: Option<String>,
}

impl TypeSummary {
    fn read(package: &mut Package, name: String) -> Self {
        let parsed = package
            .read_type(&name)
            .map_err(|e| e.to_string())
            .and_then(|bytes| bytes.ok_or_else(|| "entry vanished".to_string()))
            .and_then(|bytes| TypeDescriptor::from_bytes(&name, &bytes).map_err(|e| e.to_string()));

        match parsed {
            Ok(descriptor) => Self {
                name,
                kind: Some(descriptor.kind),
                scope: descriptor.scope(),
                execute: descriptor.execute,
                error: None,
            },
            Err(error) => Self {
                name,
                kind: None,
                scope: None,
                execute: None,
                error: Some(error),
            },
        }
    }
}

/// Execute the `modhost inspect` command
pub fn run(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let mut package = Package::open(path)?;
    let manifest = package.manifest()?.clone();
    let names: Vec<String> = package.types().collect();
    let types = names
        .into_iter()
        .map(|name| TypeSummary::read(&mut package, name))
        .collect();

    let summary = PackageSummary {
        path: path.display().to_string(),
        digest: package.digest().to_string(),
        entry_point: manifest.entry_point().map(str::to_string),
        version: manifest.version().map(str::to_string),
        exports: manifest.exports(),
        requires: manifest.requires(),
        types,
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => print_text(&summary),
    }
    Ok(())
}

fn print_text(summary: &PackageSummary) {
    println!("{} Package: {}", "→".green(), summary.path.cyan());
    println!();
    println!(
        "  Entry point:    {}",
        summary.entry_point.as_deref().unwrap_or("(missing)").white()
    );
    println!(
        "  Version:        {}",
        summary.version.as_deref().unwrap_or("(unversioned)")
    );
    println!("  Digest:         {}", summary.digest);
    println!("  Exports:        {}", list_or_none(&summary.exports));
    println!("  Requires:       {}", list_or_none(&summary.requires));
    println!("  Types ({}):", summary.types.len());
    for ty in &summary.types {
        match &ty.error {
            Some(error) => println!("    {} {}", ty.name.red(), error),
            None => {
                let mut line = format!("    {}", ty.name.cyan());
                if let Some(kind) = ty.kind.filter(|k| *k != TypeKind::Class) {
                    line.push_str(&format!(" [{:?}]", kind).to_lowercase());
                }
                if let Some(scope) = ty.scope {
                    line.push_str(&format!(" component({})", scope));
                }
                if let Some(execute) = &ty.execute {
                    line.push_str(&format!(" execute={}", execute));
                }
                println!("{}", line);
            }
        }
    }
    println!();
}
