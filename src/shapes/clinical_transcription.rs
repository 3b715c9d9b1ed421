use serde::{Deserialize, Serialize};

use crate::shape::{Prompt, Shape};
use crate::types::{FieldDef, TypeDef, ValidationError};

pub const ID: &str = "clinical-transcription";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalTranscriptionInput {
    /// `data:<mimetype>;base64,<encoded_data>`
    pub audio_data_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalTranscriptionOutput {
    pub transcription: String,
}

/// Spoken clinical notes to a structured written note.
pub struct ClinicalTranscription;

impl Shape for ClinicalTranscription {
    const ID: &'static str = ID;
    const DESCRIPTION: &'static str =
        "Transcribe spoken clinical notes into structured text.";

    type Input = ClinicalTranscriptionInput;
    type Output = ClinicalTranscriptionOutput;

    fn input_typedef() -> TypeDef {
        TypeDef::Object(vec![FieldDef::required(
            "audioDataUri",
            TypeDef::DataUri,
            "Audio data of spoken clinical notes, as a data URI that must include a MIME type \
             and use Base64 encoding. Expected format: 'data:<mimetype>;base64,<encoded_data>'.",
        )])
    }

    fn output_typedef() -> TypeDef {
        TypeDef::Object(vec![FieldDef::required(
            "transcription",
            TypeDef::Text,
            "The transcribed clinical notes in structured text format.",
        )])
    }

    fn render_prompt(input: &Self::Input) -> Result<Prompt, ValidationError> {
        Prompt::new()
            .text(
                "You are a medical scribe. Transcribe the following audio into a clear, \
                 structured clinical note.\n\nAudio: ",
            )
            .media("$.audioDataUri", &input.audio_data_uri)
    }
}
