use serde::{de::DeserializeOwned, Serialize};

use crate::media::DataUri;
use crate::types::{TypeDef, ValidationError};

/// A flow's contract: request schema, response schema and prompt template.
pub trait Shape: Send + Sync + 'static {
    /// Stable identifier used for routing (`POST /api/flows/{ID}`, gRPC `flow_id`).
    const ID: &'static str;
    const DESCRIPTION: &'static str;

    type Input: Serialize + DeserializeOwned + Send + Sync;
    type Output: Serialize + DeserializeOwned + Send;

    fn input_typedef() -> TypeDef;
    fn output_typedef() -> TypeDef;

    /// Render the template for an input that already passed validation.
    fn render_prompt(input: &Self::Input) -> Result<Prompt, ValidationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    /// Resolved by the backend into inline media content.
    Media(DataUri),
}

/// A rendered prompt: text interleaved with media references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    parts: Vec<PromptPart>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// Adds a media part parsed from a data URI field. `path` names the
    /// field for the error report.
    pub fn media(mut self, path: &str, uri: &str) -> Result<Self, ValidationError> {
        let uri = DataUri::parse(uri).map_err(|e| ValidationError::InvalidDataUri {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.parts.push(PromptPart::Media(uri));
        Ok(self)
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        // Merge adjacent text so backends see as few parts as possible.
        if let Some(PromptPart::Text(last)) = self.parts.last_mut() {
            last.push_str(&text);
        } else {
            self.parts.push(PromptPart::Text(text));
        }
    }

    pub fn parts(&self) -> &[PromptPart] {
        &self.parts
    }

    pub fn media_parts(&self) -> impl Iterator<Item = &DataUri> {
        self.parts.iter().filter_map(|p| match p {
            PromptPart::Media(uri) => Some(uri),
            PromptPart::Text(_) => None,
        })
    }

    /// Flattened text, with each media part replaced by a `{{media N: mime}}`
    /// reference. Used by text-only backends.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mut media_idx = 0;
        for part in &self.parts {
            match part {
                PromptPart::Text(t) => out.push_str(t),
                PromptPart::Media(uri) => {
                    out.push_str(&format!("{{{{media {media_idx}: {}}}}}", uri.mime_type()));
                    media_idx += 1;
                }
            }
        }
        out
    }

    /// Approximate payload size, for logging.
    pub fn byte_len(&self) -> usize {
        self.parts
            .iter()
            .map(|p| match p {
                PromptPart::Text(t) => t.len(),
                PromptPart::Media(uri) => uri.data().len(),
            })
            .sum()
    }
}
