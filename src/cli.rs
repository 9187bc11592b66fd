//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Turn newsletters into a two-host podcast episode
#[derive(Parser, Debug)]
#[command(name = "newsletter-podcast", version, about = "Turn newsletters into a two-host podcast episode")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an episode and follow it until it finishes
    Generate {
        /// Source text to turn into an episode
        #[arg(long, conflicts_with_all = ["file", "newsletter"])]
        text: Option<String>,

        /// Read the source text from a file
        #[arg(long, value_name = "PATH", conflicts_with = "newsletter")]
        file: Option<PathBuf>,

        /// Use stored newsletters as the source (repeatable)
        #[arg(long, value_name = "ID")]
        newsletter: Vec<String>,

        /// Seconds between status polls
        #[arg(long, value_name = "SECONDS", default_value = "2")]
        poll_interval: u64,
    },

    /// Show one episode with its script
    Status {
        /// Episode id
        id: String,
    },

    /// List all episodes, newest first
    List,

    /// Print the path of an episode's finished audio
    Audio {
        /// Episode id
        id: String,
    },

    /// Import a newsletter from a text file
    Import {
        /// File containing the newsletter body
        #[arg(long, value_name = "PATH")]
        file: PathBuf,

        /// Sender shown in listings
        #[arg(long)]
        sender: Option<String>,

        /// Subject shown in listings
        #[arg(long)]
        subject: Option<String>,
    },

    /// List stored newsletters, most recent first
    Newsletters,

    /// Mark episodes interrupted mid-pipeline as errored
    Reconcile,
}
