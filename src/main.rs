use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use zipdelta::{ApplyOptions, CreateOptions, DiffOptions, DEFAULT_BLOCK_SIZE};

#[derive(Parser)]
#[command(name = "zipdelta", about = "Binary patches between two versions of a ZIP archive")]
struct Cli {
    /// Log every entry as it is classified or restored
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a patch archive by comparing old and new archives
    Create {
        /// Path to the old (original) archive
        #[arg(long)]
        old: PathBuf,
        /// Path to the new (updated) archive
        #[arg(long)]
        new: PathBuf,
        /// Output path for the patch archive
        #[arg(long, short)]
        output: PathBuf,
        /// Matching granularity in bytes
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_parser = parse_block_size)]
        block_size: usize,
        /// Do not record the checksum of the old archive
        #[arg(long)]
        no_checksum: bool,
        /// Display name of the old archive stored in the patch
        #[arg(long)]
        input_name: Option<String>,
        /// Display name of the new archive stored in the patch
        #[arg(long)]
        output_name: Option<String>,
        /// Write the older file.list patch layout
        #[arg(long)]
        legacy: bool,
    },
    /// Apply a patch archive to an original archive
    Apply {
        /// Path to the original archive
        #[arg(long)]
        source: PathBuf,
        /// Path to the patch archive
        #[arg(long, short)]
        patch: PathBuf,
        /// Output path for the rebuilt archive
        #[arg(long, short)]
        output: PathBuf,
        /// Let additions replace entries already present in the original
        #[arg(long)]
        ignore_mismatch: bool,
        /// Skip the check of the original against the recorded checksum
        #[arg(long)]
        ignore_checksum: bool,
    },
}

fn parse_block_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("block size must be at least 1".to_owned()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("zipdelta=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Create {
            old,
            new,
            output,
            block_size,
            no_checksum,
            input_name,
            output_name,
            legacy,
        } => {
            println!("Creating patch...");
            println!("  Old: {}", old.display());
            println!("  New: {}", new.display());
            println!("  Output: {}", output.display());

            let options = CreateOptions {
                diff: DiffOptions { block_size },
                checksum: !no_checksum,
                input_name,
                output_name,
                legacy,
            };

            let start = Instant::now();
            let summary = zipdelta::create_patch_file(&old, &new, &output, &options)
                .with_context(|| {
                    format!("Failed to create patch from {} to {}", old.display(), new.display())
                })?;
            let elapsed = start.elapsed();

            println!("\nPatch created successfully!");
            println!("  Entries added: {}", summary.additions);
            println!("  Entries removed: {}", summary.removals);
            println!("  Entries replaced: {}", summary.replacements);
            println!("  Entries patched: {}", summary.patches);
            println!("  Entries unchanged: {}", summary.unchanged);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Apply {
            source,
            patch,
            output,
            ignore_mismatch,
            ignore_checksum,
        } => {
            println!("Applying patch...");
            println!("  Source: {}", source.display());
            println!("  Patch: {}", patch.display());
            println!("  Output: {}", output.display());

            let options = ApplyOptions {
                ignore_mismatch,
                verify_checksum: !ignore_checksum,
            };

            let start = Instant::now();
            let summary = zipdelta::apply_patch_file(&source, &patch, &output, &options)
                .with_context(|| {
                    format!("Failed to apply {} to {}", patch.display(), source.display())
                })?;
            let elapsed = start.elapsed();

            println!("\nPatch applied successfully!");
            println!("  Entries copied: {}", summary.copied);
            println!("  Entries removed: {}", summary.removed);
            println!("  Entries replaced: {}", summary.replaced);
            println!("  Entries patched: {}", summary.patched);
            println!("  Entries added: {}", summary.added);
            if summary.skipped > 0 {
                println!("  Entries superseded: {}", summary.skipped);
            }
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
    }

    Ok(())
}
