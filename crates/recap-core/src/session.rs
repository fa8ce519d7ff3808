//! Conversation session: ordered history, farewell detection, model message assembly.

use crate::chat::{Role, Turn};
use crate::error::{RecapError, RecapResult};
use recap_voice::base_language;
use std::path::Path;
use tracing::{debug, info};

const MATERIAL_START: &str = "-----CLASS MATERIAL STARTS HERE -----";
const MATERIAL_END: &str = "-----CLASS MATERIAL ENDS HERE -----";

/// Read a startup resource; a missing file is a fatal [`RecapError::Resource`].
pub fn read_resource(path: &Path) -> RecapResult<String> {
    std::fs::read_to_string(path).map_err(|source| RecapError::Resource {
        path: path.display().to_string(),
        source,
    })
}

/// Compose the system preamble from a base prompt and optional reference material.
pub fn build_system_preamble(base_prompt: &str, material: Option<&str>) -> String {
    let base_prompt = base_prompt.trim();
    match material.map(str::trim).filter(|m| !m.is_empty()) {
        None => base_prompt.to_string(),
        Some(material) => format!(
            "{base_prompt}\n\n\
             Use the reference material below as your primary source. Stay grounded in it, \
             say so when a question falls outside it, and answer in English unless asked otherwise.\n\n\
             {MATERIAL_START}\n{material}\n{MATERIAL_END}"
        ),
    }
}

/// Phrases that signal the user wants to end the session.
#[derive(Debug, Clone, Default)]
pub struct FarewellLexicon {
    phrases: Vec<String>,
}

impl FarewellLexicon {
    /// One phrase per line; blank lines are ignored, order is kept.
    pub fn from_lines(raw: &str) -> Self {
        let mut phrases: Vec<String> = Vec::new();
        for line in raw.lines() {
            let phrase = line.trim().to_lowercase();
            if !phrase.is_empty() && !phrases.contains(&phrase) {
                phrases.push(phrase);
            }
        }
        Self { phrases }
    }

    pub fn load(path: &Path) -> RecapResult<Self> {
        let lexicon = Self::from_lines(&read_resource(path)?);
        info!(path = %path.display(), phrases = lexicon.len(), "farewell lexicon loaded");
        Ok(lexicon)
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Case-insensitive substring match against every phrase.
    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

/// One conversation: a system preamble at index 0 followed by alternating user/assistant turns.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    history: Vec<Turn>,
    farewells: FarewellLexicon,
    default_language: String,
    closed: bool,
}

impl ConversationSession {
    pub fn new(system_preamble: impl Into<String>, farewells: FarewellLexicon) -> Self {
        Self {
            history: vec![Turn::system(system_preamble)],
            farewells,
            default_language: "en".to_string(),
            closed: false,
        }
    }

    /// Language that needs no "respond in" directive.
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    pub fn append(&mut self, turn: Turn) -> RecapResult<()> {
        if self.closed {
            return Err(RecapError::SessionClosed);
        }
        if turn.role == Role::System {
            return Err(RecapError::Chat("system turns are fixed at session start".to_string()));
        }
        self.history.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn system_preamble(&self) -> &Turn {
        &self.history[0]
    }

    pub fn is_farewell(&self, text: &str) -> bool {
        self.farewells.matches(text)
    }

    pub fn close(&mut self) {
        if !self.closed {
            debug!(turns = self.history.len(), "session closed");
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// History as sent to the model. A non-default language splices a directive right after the
    /// preamble; the directive is never stored.
    pub fn model_messages(&self, language: &str) -> Vec<Turn> {
        let language = language.trim();
        if language.is_empty() || base_language(language) == base_language(&self.default_language) {
            return self.history.clone();
        }
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(self.history[0].clone());
        messages.push(Turn::system(format!("Please respond in {}.", language)));
        messages.extend(self.history[1..].iter().cloned());
        messages
    }

    /// The only messages sent for a farewell: the preamble and the farewell instruction.
    pub fn farewell_messages(&self, instruction: &str) -> Vec<Turn> {
        vec![self.history[0].clone(), Turn::user(instruction)]
    }
}
