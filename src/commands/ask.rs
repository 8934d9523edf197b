use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tracing::info;

use super::{build_corpus, extension_for, mime_for, runtime, source_name};
use crate::config::Config;
use crate::error::{InferError, Result};
use crate::llm::client::{GeminiClient, GenerativeBackend, InlineMedia, UnavailableBackend};
use crate::llm::prompts::Persona;
use crate::llm::router::{Attachment, ProviderRequest, ProviderResult, ProviderRouter};

pub struct AskOptions {
    pub query: String,
    pub docs: Vec<PathBuf>,
    pub category: String,
    pub persona: String,
    pub instruction: Option<String>,
    pub rag_enabled: bool,
    pub attach: Option<PathBuf>,
    pub links: Vec<String>,
    pub secondary: bool,
    pub out_dir: PathBuf,
}

/// Resolve `--persona` / `--instruction` into a persona
pub fn resolve_persona(name: &str, instruction: Option<&str>) -> Result<Persona> {
    if let Some(text) = instruction.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(Persona::Custom {
            instruction: text.to_string(),
        });
    }
    Persona::from_str_loose(name).ok_or_else(|| {
        let known: Vec<String> = Persona::all_builtin().iter().map(|p| p.to_string()).collect();
        InferError::Config(format!(
            "Unknown persona '{}'. Use one of: {}, or pass --instruction",
            name,
            known.join(", ")
        ))
    })
}

/// Gemini when a key is configured. With `--secondary` a missing key is not
/// fatal: the open-model path answers and the primary stays offline.
fn primary_backend(config: &Config, secondary: bool) -> Result<Arc<dyn GenerativeBackend>> {
    match GeminiClient::new(&config.primary) {
        Ok(client) => Ok(Arc::new(client)),
        Err(e) if secondary => {
            info!(error = %e, "primary provider not configured, using the secondary provider only");
            Ok(Arc::new(UnavailableBackend::new(e.to_string())))
        }
        Err(e) => Err(e),
    }
}

pub fn cmd_ask(config: &Config, opts: AskOptions) -> Result<()> {
    if opts.query.trim().is_empty() {
        return Err(InferError::Config("Query must not be empty".into()));
    }
    let persona = resolve_persona(&opts.persona, opts.instruction.as_deref())?;

    let attachment = match &opts.attach {
        Some(path) => Some(Attachment {
            name: source_name(path),
            media: InlineMedia {
                mime_type: mime_for(path).to_string(),
                data: std::fs::read(path)?,
            },
        }),
        None => None,
    };

    let backend = primary_backend(config, opts.secondary)?;

    let rt = runtime()?;
    rt.block_on(async {
        let mut router = ProviderRouter::from_config(config, backend);
        if !opts.docs.is_empty() {
            let corpus = build_corpus(config, &opts.docs, &opts.category).await?;
            router = router.with_corpus(corpus);
        }

        let request = ProviderRequest {
            query: opts.query.clone(),
            history: Vec::new(),
            attachment,
            links: opts.links.clone(),
            persona,
            retrieved_context: None,
            rag_enabled: opts.rag_enabled,
            use_secondary: opts.secondary,
        };

        match router.respond(&request).await {
            Ok(result) => print_result(&result, &opts.out_dir),
            Err(e @ InferError::ElevatedAccessRequired(_)) => {
                eprintln!(
                    "{} This request needs a Gemini API key with access to the requested model or tool.",
                    "Upgrade required:".yellow().bold()
                );
                eprintln!(
                    "  Use a key from a billing-enabled project, or retry without links/tools (e.g. attach a document)."
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    })
}

fn print_result(result: &ProviderResult, out_dir: &std::path::Path) -> Result<()> {
    println!("{}", result.text.trim());

    if !result.citations.is_empty() {
        println!("\n{}", "Sources:".cyan().bold());
        for (i, citation) in result.citations.iter().enumerate() {
            let title = if citation.title.is_empty() {
                &citation.uri
            } else {
                &citation.title
            };
            println!("  [{}] {} {}", i + 1, title, citation.uri.dimmed());
        }
    }

    if let Some(image) = &result.image {
        std::fs::create_dir_all(out_dir)?;
        let file = out_dir.join(format!(
            "infermate-{}.{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S"),
            extension_for(&image.mime_type)
        ));
        std::fs::write(&file, &image.data)?;
        println!("\n{} {}", "Image saved:".green().bold(), file.display());
    }

    if let Some(uri) = &result.video_uri {
        println!("{} {}", "Video:".green().bold(), uri);
    }

    Ok(())
}
