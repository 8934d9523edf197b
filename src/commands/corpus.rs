use std::path::PathBuf;

use colored::Colorize;

use super::{build_corpus, runtime};
use crate::config::Config;
use crate::embeddings::RankedResult;
use crate::error::{InferError, Result};

pub fn cmd_search(
    config: &Config,
    query: &str,
    docs: &[PathBuf],
    category: &str,
    top_k: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        return Err(InferError::Config("Query must not be empty".into()));
    }
    let top_k = top_k.unwrap_or(config.retrieval.top_k).max(1);

    let rt = runtime()?;
    rt.block_on(async {
        let corpus = build_corpus(config, docs, category).await?;
        let results = corpus.similarity_search(query, top_k).await?;

        if results.is_empty() {
            println!("No matching fragments for '{}'", query);
            return Ok(());
        }

        println!(
            "{} Top {} fragment(s) for '{}':\n",
            "Search".green().bold(),
            results.len(),
            query
        );
        for result in &results {
            print_ranked(result);
        }
        Ok(())
    })
}

pub fn cmd_index(config: &Config, docs: &[PathBuf], category: &str) -> Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let corpus = build_corpus(config, docs, category).await?;
        let stats = corpus.stats();

        println!("{} Corpus ready:", "Done!".green().bold());
        println!("  Total fragments: {}", stats.total_fragments);
        if let Some(dimension) = corpus.dimension() {
            println!("  Dimension: {}", dimension);
        }
        println!("  Categories: {}", stats.categories.join(", "));
        Ok(())
    })
}

fn print_ranked(result: &RankedResult) {
    println!(
        "  {} [{} · {}] ({:.1}%)",
        ">".green(),
        result.entry.source.cyan(),
        result.entry.category,
        result.score * 100.0
    );
    println!("    {}\n", truncate_text(&result.entry.text, 150));
}

fn truncate_text(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}
