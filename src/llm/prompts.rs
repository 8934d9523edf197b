use std::fmt;

pub const BASE_PREAMBLE: &str = r#"You are InferMate, a careful and friendly AI assistant. Answer accurately and say so when you are unsure. Never invent facts, citations, or links. Refuse requests for harmful, hateful, or illegal content. Keep answers well structured and as short as the question allows."#;

/// Appended when the turn is routed to the mapping tool
pub const GEO_DIRECTIVE: &str = r#"Before using the maps tool, resolve any historical, colloquial, or ambiguous place name in the request to its modern, unambiguous equivalent (for example "Constantinople" becomes "Istanbul, Turkey") and search for that."#;

pub const SYSTEM_PROMPT_ENHANCER: &str = r#"You are a visual prompt writer. Rewrite the user's idea into one rich paragraph describing a single cinematic scene: subject, setting, lighting, colour palette, camera angle and motion. Output only the description."#;

pub const SYSTEM_LINK_READER: &str = r#"You read web pages on the user's behalf. Use search to open the given address and report the information on that page that is relevant to the user's question. Be factual and concise."#;

/// Conversational personas. Every persona maps to exactly one instruction
/// template; adding a variant forces a template to be written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Persona {
    #[default]
    Assistant,
    Tutor,
    Researcher,
    Storyteller,
    /// Image and video creation
    VisualCreator,
    /// User-authored instruction used verbatim
    Custom { instruction: String },
}

const BUILTIN_PERSONAS: &[Persona] = &[
    Persona::Assistant,
    Persona::Tutor,
    Persona::Researcher,
    Persona::Storyteller,
    Persona::VisualCreator,
];

impl Persona {
    pub fn all_builtin() -> &'static [Persona] {
        BUILTIN_PERSONAS
    }

    pub fn from_str_loose(s: &str) -> Option<Persona> {
        match s.to_lowercase().as_str() {
            "assistant" | "default" | "general" => Some(Persona::Assistant),
            "tutor" | "teacher" => Some(Persona::Tutor),
            "researcher" | "research" => Some(Persona::Researcher),
            "storyteller" | "story" => Some(Persona::Storyteller),
            "visual" | "visual-creator" | "creator" | "artist" => Some(Persona::VisualCreator),
            _ => None,
        }
    }

    pub fn template(&self) -> &str {
        match self {
            Persona::Assistant => {
                "Act as a general-purpose assistant. Be direct and practical."
            }
            Persona::Tutor => {
                "Act as a patient tutor. Explain step by step, check understanding, and end with one short question that tests the key idea."
            }
            Persona::Researcher => {
                "Act as a research analyst. Prefer primary sources, compare viewpoints, and cite the sources you rely on."
            }
            Persona::Storyteller => {
                "Act as a storyteller. Answer with vivid, imaginative narrative while keeping any facts correct."
            }
            Persona::VisualCreator => {
                "Act as a visual artist. Turn requests into striking images and short animations, and describe what you made in one or two sentences."
            }
            Persona::Custom { instruction } => instruction.as_str(),
        }
    }

    pub fn is_visual(&self) -> bool {
        matches!(self, Persona::VisualCreator)
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persona::Assistant => write!(f, "assistant"),
            Persona::Tutor => write!(f, "tutor"),
            Persona::Researcher => write!(f, "researcher"),
            Persona::Storyteller => write!(f, "storyteller"),
            Persona::VisualCreator => write!(f, "visual"),
            Persona::Custom { .. } => write!(f, "custom"),
        }
    }
}

/// Everything that goes into one turn's system instruction
pub struct InstructionParts<'a> {
    pub persona: &'a Persona,
    pub retrieved_context: Option<&'a str>,
    pub document_name: Option<&'a str>,
    pub linked_sources: &'a [(String, String)],
    pub geo: bool,
}

pub fn compose_system_instruction(parts: &InstructionParts<'_>) -> String {
    let mut out = String::from(BASE_PREAMBLE);
    out.push_str("\n\n");
    out.push_str(parts.persona.template());

    if let Some(context) = parts.retrieved_context.filter(|c| !c.trim().is_empty()) {
        out.push_str(&format!(
            "\n\n--- RETRIEVED CONTEXT (from the user's knowledge base) ---\n{}\n--- END RETRIEVED CONTEXT ---\nPrefer this context when it answers the question, and say which source you used.",
            context.trim()
        ));
    }

    if let Some(name) = parts.document_name {
        out.push_str(&format!(
            "\n\n[DOCUMENT CONTEXT] The user attached \"{}\". Ground your answer in that document.",
            name
        ));
    }

    if !parts.linked_sources.is_empty() {
        out.push_str("\n\n--- LINKED SOURCES ---");
        for (url, content) in parts.linked_sources {
            out.push_str(&format!("\n[{}]\n{}", url, content.trim()));
        }
        out.push_str("\n--- END LINKED SOURCES ---");
    }

    if parts.geo {
        out.push_str("\n\n");
        out.push_str(GEO_DIRECTIVE);
    }

    out
}

pub fn enhance_prompt(user_prompt: &str) -> String {
    format!("Idea: {}\n\nDescription:", user_prompt.trim())
}

pub fn link_reader_prompt(url: &str, query: &str) -> String {
    format!(
        "Address: {}\nQuestion: {}\n\nSummarise what this page says that helps answer the question.",
        url, query
    )
}
