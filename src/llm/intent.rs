use std::sync::OnceLock;

use regex::Regex;

use super::client::ToolConfig;
use super::prompts::Persona;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualMode {
    /// Enhance → still image → video
    Animate,
    /// Single image
    Still,
}

/// How a turn is routed. Produced by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Visual(VisualMode),
    Geo,
    ImageTool,
    WebSearch,
    Plain,
}

impl Intent {
    pub fn tools(&self) -> ToolConfig {
        match self {
            Intent::Geo => ToolConfig::Maps,
            Intent::ImageTool => ToolConfig::ImageGeneration,
            Intent::WebSearch => ToolConfig::WebSearch,
            Intent::Visual(_) | Intent::Plain => ToolConfig::None,
        }
    }

    /// Whether this turn produces an image or video
    pub fn generates_media(&self) -> bool {
        matches!(self, Intent::Visual(_) | Intent::ImageTool)
    }
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(maps?|mapp(?:ing|ed)|locat(?:e|es|ed|ing|ion|ions)|paths?|where\s+is)\b").expect("static regex")
    })
}

fn image_verb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(generat(?:e|es|ed|ing)|creat(?:e|es|ed|ing)|draw(?:s|n|ing)?|drew|mak(?:e|es|ing)|made)\b").expect("static regex"))
}

fn media_noun_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(images?|pictures?|photos?|art|artwork)\b").expect("static regex")
    })
}

fn video_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(videos?|animat(?:e|es|ed|ing|ion|ions)|movies?|motion)\b").expect("static regex")
    })
}

pub fn is_location_query(query: &str) -> bool {
    location_re().is_match(query)
}

pub fn is_image_request(query: &str) -> bool {
    image_verb_re().is_match(query) && media_noun_re().is_match(query)
}

pub fn is_video_request(query: &str) -> bool {
    video_re().is_match(query)
}

/// Route a turn. Rules are checked in order and the first match wins:
/// visual persona, location keywords, image request (no attachment),
/// web search (no attachment), plain.
pub fn classify(
    query: &str,
    persona: &Persona,
    has_attachment: bool,
    has_image_attachment: bool,
) -> Intent {
    if persona.is_visual() {
        if is_video_request(query) && !has_image_attachment {
            return Intent::Visual(VisualMode::Animate);
        }
        return Intent::Visual(VisualMode::Still);
    }

    if is_location_query(query) {
        return Intent::Geo;
    }

    if !has_attachment {
        if is_image_request(query) {
            return Intent::ImageTool;
        }
        return Intent::WebSearch;
    }

    Intent::Plain
}
