use colored::Colorize;

use crate::config::Config;
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;

pub fn cmd_providers(config: &Config) -> Result<()> {
    let key_state = |present: bool| {
        if present {
            "configured".green()
        } else {
            "missing".red()
        }
    };

    println!("{}", "Primary (Gemini)".bold());
    println!("  Endpoint:  {}", config.primary.endpoint);
    println!("  API key:   {}", key_state(config.primary.api_key.is_some()));
    println!("  Text:      {}", config.primary.models.text);
    println!("  Geo:       {}", config.primary.models.geo);
    println!("  Image:     {}", config.primary.models.image);
    println!("  Video:     {}", config.primary.models.video);

    let embedder = EmbeddingProvider::from_settings(&config.embedding);
    println!("\n{}", "Embeddings".bold());
    println!("  Provider:  {}", embedder.display_name());
    println!(
        "  Chunks:    {} chars, top {}",
        config.retrieval.chunk_size, config.retrieval.top_k
    );

    println!("\n{}", "Secondary (open models)".bold());
    println!("  Proxy:     {}", config.secondary.proxy_url);
    println!("  Inference: {}", config.secondary.inference_base);
    println!("  API key:   {}", key_state(config.secondary.api_key.is_some()));
    for (i, model) in config.secondary.candidates.iter().enumerate() {
        println!("  {}. {}", i + 1, model);
    }

    if let Ok(path) = Config::path() {
        let note = if path.exists() { "" } else { " (not present, using defaults)" };
        println!("\n{} {}{}", "Config:".cyan(), path.display(), note);
    }

    Ok(())
}
