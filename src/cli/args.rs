//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Vellum view engine CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: vellum.toml)
    #[arg(short = 'C', long, global = true, default_value = "vellum.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Print debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a request for a view through the lifecycle and print the response
    #[command(visible_alias = "r")]
    Render {
        #[command(flatten)]
        args: RenderArgs,
    },

    /// Compile every template under the root and report errors
    #[command(visible_alias = "c")]
    Check {
        /// Template root directory
        #[arg(short, long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
        root: PathBuf,
    },
}

/// Render command arguments.
#[derive(clap::Args, Debug, Clone)]
pub struct RenderArgs {
    /// View id to request (e.g. /index.xhtml or /index)
    #[arg(value_name = "VIEW_ID")]
    pub view_id: String,

    /// Template root directory
    #[arg(short, long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    pub root: PathBuf,

    /// Submit the view as a postback after an initial GET
    #[arg(short, long)]
    pub postback: bool,

    /// Active resource library contract (repeatable)
    #[arg(long = "contract", value_name = "NAME")]
    pub contracts: Vec<String>,

    /// Print the component tree as JSON instead of the response
    #[arg(long)]
    pub tree: bool,
}
