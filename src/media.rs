//! Inline media helpers.
//!
//! Audio and image inputs travel through the flows as data URIs
//! (`data:<mime>;base64,<payload>`). The prompt layer never interpolates
//! the payload into text; it hands the decoded parts to the model backend,
//! which turns them into inline media content.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataUriError {
    #[error("data URI must start with 'data:'")]
    MissingScheme,
    #[error("data URI is missing the ',' separating header and payload")]
    MissingPayload,
    #[error("data URI must declare a MIME type")]
    MissingMimeType,
    #[error("data URI must use base64 encoding")]
    NotBase64,
    #[error("data URI payload is not valid base64: {0}")]
    InvalidPayload(String),
}

/// A parsed `data:` URI. The payload is kept base64-encoded since every
/// backend wants it that way on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    mime_type: String,
    data: String,
}

impl DataUri {
    pub fn parse(uri: &str) -> Result<Self, DataUriError> {
        let rest = uri.strip_prefix("data:").ok_or(DataUriError::MissingScheme)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUriError::MissingPayload)?;

        let mut params = header.split(';');
        let mime_type = params.next().unwrap_or_default().trim();
        if mime_type.is_empty() || !mime_type.contains('/') {
            return Err(DataUriError::MissingMimeType);
        }
        if !params.any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(DataUriError::NotBase64);
        }

        STANDARD
            .decode(payload)
            .map_err(|e| DataUriError::InvalidPayload(e.to_string()))?;

        Ok(Self {
            mime_type: mime_type.to_string(),
            data: payload.to_string(),
        })
    }

    pub fn encode(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Base64 payload, without the header.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

impl std::fmt::Display for DataUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}

/// In-memory audio capture buffer.
///
/// Chunks are appended as they arrive and only assembled once the recording
/// is finished. Voice notes are short, so there is no spill to disk.
#[derive(Debug, Default)]
pub struct AudioRecording {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("recording is empty")]
pub struct EmptyRecording;

impl AudioRecording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk.to_vec());
    }

    pub fn len(&self) -> usize {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    /// Stop recording: join the chunks into one blob and encode it.
    pub fn finish(self, mime_type: &str) -> Result<DataUri, EmptyRecording> {
        if self.is_empty() {
            return Err(EmptyRecording);
        }
        let mut blob = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks {
            blob.extend_from_slice(&chunk);
        }
        Ok(DataUri::encode(mime_type, &blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_png_data_url() {
        let uri = DataUri::parse("data:image/png;base64,AAA=").unwrap();
        assert_eq!(uri.mime_type(), "image/png");
        assert_eq!(uri.data(), "AAA=");
        assert!(uri.is_image());
        assert_eq!(uri.to_string(), "data:image/png;base64,AAA=");
    }

    #[test]
    fn accepts_extra_parameters() {
        let uri = DataUri::parse("data:audio/webm;codecs=opus;base64,AAA=").unwrap();
        assert_eq!(uri.mime_type(), "audio/webm");
        assert!(uri.is_audio());
    }

    #[test]
    fn rejects_malformed_uris() {
        assert_eq!(
            DataUri::parse("image/png;base64,AAA="),
            Err(DataUriError::MissingScheme)
        );
        assert_eq!(
            DataUri::parse("data:image/png;base64"),
            Err(DataUriError::MissingPayload)
        );
        assert_eq!(
            DataUri::parse("data:;base64,AAA="),
            Err(DataUriError::MissingMimeType)
        );
        assert_eq!(
            DataUri::parse("data:text/plain,hello"),
            Err(DataUriError::NotBase64)
        );
        assert!(matches!(
            DataUri::parse("data:image/png;base64,!!!"),
            Err(DataUriError::InvalidPayload(_))
        ));
    }

    #[test]
    fn recording_assembles_chunks_in_order() {
        let mut rec = AudioRecording::new();
        rec.push_chunk(b"abc");
        rec.push_chunk(b"");
        rec.push_chunk(b"def");
        assert_eq!(rec.len(), 6);

        let uri = rec.finish("audio/webm").unwrap();
        assert_eq!(uri, DataUri::encode("audio/webm", b"abcdef"));
    }

    #[test]
    fn empty_recording_is_rejected() {
        assert_eq!(AudioRecording::new().finish("audio/wav"), Err(EmptyRecording));
    }
}
