#![allow(dead_code)]
mod cli;
mod commands;
mod config;
mod embeddings;
mod error;
mod llm;

use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use error::Result;
use tracing_subscriber::EnvFilter;

use commands::ask::{cmd_ask, AskOptions};
use commands::corpus::{cmd_index, cmd_search};
use commands::providers::cmd_providers;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load()?;

    match cli.command {
        Commands::Ask {
            query,
            docs,
            category,
            persona,
            instruction,
            no_rag,
            attach,
            links,
            secondary,
            out,
        } => cmd_ask(
            &config,
            AskOptions {
                query,
                docs,
                category,
                persona,
                instruction,
                rag_enabled: !no_rag,
                attach,
                links,
                secondary,
                out_dir: out,
            },
        ),
        Commands::Search {
            query,
            docs,
            category,
            top_k,
        } => cmd_search(&config, &query, &docs, &category, top_k),
        Commands::Index { docs, category } => cmd_index(&config, &docs, &category),
        Commands::Providers => cmd_providers(&config),
    }
}

/// `RUST_LOG` wins; otherwise warnings only, or debug for our crate with --verbose
fn init_tracing(verbose: bool) {
    let default = if verbose { "infermate=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
