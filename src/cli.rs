//! Command-line argument parsing for tabletalk.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ask questions about your CSV files in plain language.
#[derive(Parser, Debug)]
#[command(name = "tabletalk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Dataset store: sqlite:<path>, a plain file path, or postgres://...
    #[arg(long, value_name = "CONNECTION", global = true)]
    pub db: Option<String>,

    /// LLM provider to use: groq, openai, ollama or mock (overrides config)
    #[arg(long, value_name = "PROVIDER", global = true)]
    pub llm: Option<String>,

    /// Write logs to the log file instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Upload a CSV file as a new dataset
    Upload {
        /// CSV file to upload
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Owner of the new dataset
        #[arg(long, env = "TABLETALK_EMAIL", value_name = "EMAIL")]
        email: String,
    },

    /// List your datasets, newest first
    Datasets {
        #[arg(long, env = "TABLETALK_EMAIL", value_name = "EMAIL")]
        email: String,
    },

    /// Ask a question about a dataset
    Ask {
        #[arg(value_name = "DATASET_ID")]
        dataset_id: String,

        /// The question; multiple words are joined with spaces
        #[arg(value_name = "QUESTION", required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Show a dataset's columns
    Columns {
        #[arg(value_name = "DATASET_ID")]
        dataset_id: String,
    },
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(tabletalk::config::Config::default_path)
    }
}
