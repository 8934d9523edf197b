use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "infermate",
    about = "Retrieval-augmented assistant with multi-provider routing",
    version
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(global = true, long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a question, grounded in indexed documents, attachments and links
    Ask {
        /// The question or prompt
        query: String,

        /// Text files to index into the session corpus before answering
        #[arg(long = "doc", value_name = "FILE")]
        docs: Vec<PathBuf>,

        /// Category label for indexed documents
        #[arg(long, default_value = "general")]
        category: String,

        /// Persona (assistant, tutor, researcher, storyteller, visual)
        #[arg(long, default_value = "assistant")]
        persona: String,

        /// Custom persona instruction; overrides --persona
        #[arg(long)]
        instruction: Option<String>,

        /// Don't retrieve context from the session corpus
        #[arg(long)]
        no_rag: bool,

        /// Document or image sent along with the question
        #[arg(long, value_name = "FILE")]
        attach: Option<PathBuf>,

        /// Web page to read as extra context (repeatable)
        #[arg(long = "link", value_name = "URL")]
        links: Vec<String>,

        /// Answer with the open-model secondary provider
        #[arg(long)]
        secondary: bool,

        /// Directory for generated images
        #[arg(long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
    },

    /// Index documents and show the fragments closest to a query
    Search {
        /// Search query
        query: String,

        /// Text files to index
        #[arg(long = "doc", value_name = "FILE", required = true)]
        docs: Vec<PathBuf>,

        /// Category label for indexed documents
        #[arg(long, default_value = "general")]
        category: String,

        /// Number of fragments to show
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },

    /// Index documents and print corpus statistics
    Index {
        /// Text files to index
        #[arg(long = "doc", value_name = "FILE", required = true)]
        docs: Vec<PathBuf>,

        /// Category label for indexed documents
        #[arg(long, default_value = "general")]
        category: String,
    },

    /// Show the resolved providers and models
    Providers,
}
