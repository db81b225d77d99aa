//! Command-line interface.
//!
//! The binary is an inspection tool over an existing index directory:
//! queries, context listings and maintenance. Indexing itself is driven
//! in-process by the server embedding [`crate::IndexEngine`], which owns
//! the compiler front-end.

use crate::config::Settings;
use crate::error::IndexResult;
use crate::lookup;
use crate::registry::IndexRegistry;
use crate::types::RelationKind;
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tundra")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Header-context-aware symbol index engine for C/C++ language servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Query relations at a byte offset
    Lookup {
        /// Source file the position refers to
        file: PathBuf,

        /// Byte offset within the file
        offset: u32,

        /// Relation kinds, comma separated (e.g. `definition,declaration`)
        #[arg(short, long, default_value = "reference")]
        kind: String,
    },

    /// List the symbols recorded in a file's index
    Symbols {
        /// Source file whose index to inspect
        file: PathBuf,
    },

    /// List the header contexts of a file
    Contexts {
        /// Header file to inspect
        file: PathBuf,

        /// Also resolve each context's include chain
        #[arg(short, long)]
        resolve: bool,
    },

    /// Delete index files no longer referenced by the registry
    Gc,
}

pub fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init(force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Lookup { file, offset, kind } => run_lookup(&settings, &file, offset, &kind),
        Commands::Symbols { file } => run_symbols(&settings, &file),
        Commands::Contexts { file, resolve } => run_contexts(&settings, &file, resolve),
        Commands::Gc => {
            let registry = load_registry(&settings)?;
            let removed = registry.gc_orphans();
            println!("Removed {removed} orphan index files");
            Ok(())
        }
    }
}

fn load_registry(settings: &Settings) -> IndexResult<IndexRegistry> {
    IndexRegistry::load(settings.index.dir.clone())
}

fn parse_kind_mask(spec: &str) -> anyhow::Result<RelationKind> {
    let mut mask = RelationKind::empty();
    for name in spec.split(',') {
        let name = name.trim();
        let kind = RelationKind::from_cli_name(name)
            .with_context(|| format!("unknown relation kind '{name}'"))?;
        mask |= kind;
    }
    Ok(mask)
}

fn run_lookup(settings: &Settings, file: &PathBuf, offset: u32, kind: &str) -> anyhow::Result<()> {
    let mask = parse_kind_mask(kind)?;
    let registry = load_registry(settings)?;
    let file_str = file.to_string_lossy();

    let Some(origin) = registry.origin_blob(&file_str) else {
        bail!("no index known for {}", file.display());
    };

    let others = registry.all_blobs();
    let hits = lookup::run_query(&origin, offset, mask, &others)?;

    if hits.is_empty() {
        println!("No results");
    }
    for hit in hits {
        println!("{}:{}..{}", hit.path.display(), hit.range.begin, hit.range.end);
    }
    Ok(())
}

fn run_symbols(settings: &Settings, file: &PathBuf) -> anyhow::Result<()> {
    let registry = load_registry(settings)?;
    let Some(origin) = registry.origin_blob(&file.to_string_lossy()) else {
        bail!("no index known for {}", file.display());
    };

    let path = format!("{}.sidx", origin.prefix);
    let data = std::fs::read(&path).with_context(|| format!("reading {path}"))?;
    let blob = open_blob(&data, &path)?;

    for symbol in blob.symbols() {
        println!(
            "{:016x} {:<12} {} ({} relations)",
            symbol.id().value(),
            symbol.kind().as_str(),
            symbol.name(),
            symbol.relations().count(),
        );
    }
    Ok(())
}

fn open_blob<'a>(data: &'a [u8], path: &str) -> anyhow::Result<crate::index::IndexBlob<'a>> {
    crate::index::IndexBlob::new(data)
        .map_err(|reason| anyhow::anyhow!("index blob {path} is malformed: {reason}"))
}

fn run_contexts(settings: &Settings, file: &PathBuf, resolve: bool) -> anyhow::Result<()> {
    let registry = load_registry(settings)?;
    let Some(header_id) = registry.header_id(&file.to_string_lossy()) else {
        bail!("{} has no recorded header contexts", file.display());
    };

    let header = registry.header(header_id);
    for (slot, meta) in header.indices.iter().enumerate() {
        println!("index {}: {}", slot, meta.path);
        for (tu, entries) in &header.contexts {
            let record = registry.tu(*tu);
            for entry in entries {
                if entry.index_slot != slot as u32 {
                    continue;
                }
                println!("  from {} (include #{})", record.src_path, entry.include);
                if resolve {
                    for (path, line) in registry.resolve_chain(*tu, entry.include) {
                        println!("    {path}:{line}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind_mask() {
        let mask = parse_kind_mask("definition,declaration").unwrap();
        assert!(mask.contains(RelationKind::DEFINITION));
        assert!(mask.contains(RelationKind::DECLARATION));
        assert!(!mask.contains(RelationKind::REFERENCE));

        assert!(parse_kind_mask("bogus").is_err());
    }
}
