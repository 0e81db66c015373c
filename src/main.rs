//! Vellum - a server-side view engine.

use anyhow::Result;
use clap::{ColorChoice, Parser};
use vellum::cli::{self, Cli, Commands};
use vellum::config::VellumConfig;
use vellum::{debug, logger};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let config = VellumConfig::load_or_default(&cli.config)?;
    logger::set_verbose(cli.verbose || config.log.verbose);
    debug!("config"; "loaded {:?}", config);

    match &cli.command {
        Commands::Render { args } => cli::render::run_render(args, &config),
        Commands::Check { root } => cli::check::run_check(root, &config),
    }
}
