//! `graph`: validate a package manifest and show its build order.
use anyhow::{Context, Result};
use cconartist_core::BuildGraph;
use cconartist_schema::PackageManifest;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use std::path::Path;

const BUILTIN_MANIFEST: &str = include_str!("../../manifests/cconartist.toml");

/// The manifest at `path`, or the built-in one.
pub fn load_manifest(path: Option<&Path>) -> Result<PackageManifest> {
    match path {
        Some(path) => PackageManifest::load(path)
            .with_context(|| format!("Failed to load manifest {}", path.display())),
        None => PackageManifest::from_toml_str(BUILTIN_MANIFEST).context("Built-in manifest is invalid"),
    }
}

pub fn graph(
    manifest: Option<&Path>,
    target: Option<&str>,
    source_root: &Path,
    output_root: &Path,
) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    let graph = BuildGraph::assemble(&manifest).context("Invalid build graph")?;

    let Some(name) = target else {
        print_layers(&graph)?;
        return Ok(());
    };

    let decl = graph
        .target(name)
        .with_context(|| format!("Unknown target '{name}'"))?;
    println!("{} ({}) -> {}", decl.name, decl.kind, decl.output_name());

    println!("Links:");
    for artifact in graph.link_closure(name)? {
        println!("  {artifact}");
    }

    let plan = graph.copy_plan(name, source_root, output_root)?;
    if !plan.is_empty() {
        println!("Copies:");
        for (from, to) in plan {
            println!("  {} -> {}", from.display(), to.display());
        }
    }
    Ok(())
}

fn print_layers(graph: &BuildGraph) -> Result<()> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Layer", "Target", "Kind", "Output", "Depends"]);

    for (layer, names) in graph.build_layers()?.iter().enumerate() {
        for name in names {
            let Some(target) = graph.target(name) else {
                continue;
            };
            let depends: Vec<String> = target.depends.iter().map(ToString::to_string).collect();
            table.add_row(vec![
                layer.to_string(),
                target.name.clone(),
                target.kind.to_string(),
                target.output_name().to_string(),
                depends.join(", "),
            ]);
        }
    }

    println!("Package {}", graph.package());
    println!("{table}");
    Ok(())
}
