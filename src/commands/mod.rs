pub mod ask;
pub mod corpus;
pub mod providers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::embeddings::{CorpusIndex, EmbeddingProvider};
use crate::error::{InferError, Result};

/// Single-threaded runtime for one CLI command
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| InferError::Config(format!("tokio runtime: {}", e)))
}

/// Embed `docs` into a fresh session corpus, showing progress
pub async fn build_corpus(
    config: &Config,
    docs: &[PathBuf],
    category: &str,
) -> Result<Arc<CorpusIndex>> {
    let provider = EmbeddingProvider::from_settings(&config.embedding);
    let corpus = Arc::new(CorpusIndex::new(
        Arc::new(provider),
        config.retrieval.chunk_size,
    ));
    if docs.is_empty() {
        return Ok(corpus);
    }

    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let bar = pb.clone();
    let subscription = corpus.subscribe(move |event| {
        bar.set_message(format!("{} (+{} fragments)", event.source, event.added));
    });

    for path in docs {
        let text = std::fs::read_to_string(path)?;
        let source = source_name(path);
        pb.set_message(source.clone());
        let added = corpus.add_document(&text, &source, category).await;
        if added == 0 && !text.trim().is_empty() {
            pb.println(format!(
                "  {} {} could not be embedded",
                "!".yellow(),
                source
            ));
        }
        pb.inc(1);
    }
    subscription.unsubscribe();
    pb.finish_and_clear();

    let stats = corpus.stats();
    eprintln!(
        "{} {} fragments from {} document(s)",
        "Indexed".green().bold(),
        stats.total_fragments,
        docs.len()
    );
    Ok(corpus)
}

pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// MIME type from the file extension
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

/// File extension for a generated media MIME type
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}
