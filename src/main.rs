//! Streaming tar archiver
//!
//! # Architecture
//!
//! The main entry point handles:
//! 1. Logger setup (`RUST_LOG`, default `warn`)
//! 2. CLI argument parsing
//! 3. Dispatching to the selected mode (list, create, extract, pipe)
//!
//! Modes are checked in a fixed order and the first one present wins.
//! Without a mode the usage line is printed and the process exits with 1.

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};
use std::process;

use gar::args::Args;
use gar::extract::{ExtractOptions, extract_archive};
use gar::list::list_archive;
use gar::pipe::extract_to_stdout;
use gar::writer::{CreateOptions, create_archive};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let compression = args.compression_kind()?;
    let filter = args.filter();

    if let Some(archive) = &args.list {
        list_archive(archive, compression, filter.as_ref(), args.verbose)
            .with_context(|| format!("Failed to list archive: {}", archive.display()))?;
    } else if args.create {
        let Some((archive, sources)) = args.operands.split_first() else {
            bail!("-c requires an archive path followed by the sources to add");
        };
        let sources: Vec<PathBuf> = sources.iter().map(PathBuf::from).collect();
        let options = CreateOptions {
            verbose: args.verbose,
            quiet: args.quiet,
        };
        create_archive(Path::new(archive), &sources, compression, &options)
            .with_context(|| format!("Failed to create archive: {archive}"))?;
    } else if let Some(archive) = &args.extract {
        if args.to_stdout {
            extract_to_stdout(archive, compression, filter.as_ref())
                .with_context(|| format!("Failed to extract {} to stdout", archive.display()))?;
        } else {
            let destination = args.directory.clone().unwrap_or_else(|| PathBuf::from("."));
            let options = ExtractOptions {
                keep_existing: args.keep_existing,
                restore_mtime: !args.no_mtime,
                quiet: args.quiet,
            };
            extract_archive(archive, compression, filter.as_ref(), &destination, &options)
                .with_context(|| format!("Failed to extract archive: {}", archive.display()))?;
        }
    } else {
        eprintln!("{}", Args::command().render_usage());
        process::exit(1);
    }

    Ok(())
}
