//! Command-line interface, parsed with `clap`.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use procwise::commands::Cli;
//!
//! let cli = Cli::parse();
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// The parsed command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the config file, overriding the per-user default.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Ask a single question and print the answer.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Chat template name, resolved under the config directory.
        #[arg(name = "template", short = 't')]
        template: Option<String>,
    },

    /// Start an interactive support session.
    #[clap(name = "interactive", alias = "i")]
    Interactive {
        #[arg(name = "template", short = 't')]
        template: Option<String>,
    },

    /// Re-embed every process definition and rebuild the vector index.
    Reindex,

    /// Check process definition files and report problems per file.
    Validate {
        /// Directory to check; defaults to the configured processes_dir.
        dir: Option<PathBuf>,
    },

    /// Show match analytics: most requested processes, recent misses.
    Stats,

    /// Create the config directory with a starter config, template,
    /// relationship table and sample process definition.
    Init,
}
