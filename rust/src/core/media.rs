// Media payload helpers: base64 decoding, embedded `data:` URIs, voice playback.

use base64::Engine;

use super::api::ApiError;

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const MAX_VOICE_BYTES: usize = 2 * 1024 * 1024;

#[derive(uniffi::Enum, Debug, Clone, PartialEq, Eq)]
pub enum VoicePlayback {
    Remote { url: String },
    Embedded { mime_type: String, bytes: Vec<u8> },
    /// Payload could not be decoded; the UI shows a plain link/placeholder.
    Fallback { media_ref: String },
}

pub(crate) struct DecodedImage {
    pub bytes: Vec<u8>,
    pub preview_ref: String,
}

pub(crate) fn decode_image(data_base64: &str, mime_type: &str) -> Result<DecodedImage, ApiError> {
    if !mime_type.starts_with("image/") {
        return Err(ApiError::InvalidMedia(format!(
            "unsupported image type {mime_type}"
        )));
    }
    let bytes = decode_base64(data_base64)?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::InvalidMedia("image is too large".into()));
    }
    Ok(DecodedImage {
        preview_ref: data_url(mime_type, &bytes),
        bytes,
    })
}

/// Voice notes travel inline as a `data:` URI rather than being uploaded.
pub(crate) fn embed_voice_note(data_base64: &str, mime_type: &str) -> Result<String, ApiError> {
    if !mime_type.starts_with("audio/") {
        return Err(ApiError::InvalidMedia(format!(
            "unsupported audio type {mime_type}"
        )));
    }
    let bytes = decode_base64(data_base64)?;
    if bytes.is_empty() {
        return Err(ApiError::InvalidMedia("voice note is empty".into()));
    }
    if bytes.len() > MAX_VOICE_BYTES {
        return Err(ApiError::InvalidMedia("voice note is too long".into()));
    }
    Ok(data_url(mime_type, &bytes))
}

pub fn voice_playback(media_ref: &str) -> VoicePlayback {
    let trimmed = media_ref.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return VoicePlayback::Remote {
            url: trimmed.to_string(),
        };
    }
    match parse_data_url(trimmed) {
        Some((mime_type, bytes)) if !bytes.is_empty() => VoicePlayback::Embedded { mime_type, bytes },
        _ => {
            tracing::debug!("voice payload not decodable; using fallback playback");
            VoicePlayback::Fallback {
                media_ref: media_ref.to_string(),
            }
        }
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, ApiError> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::InvalidMedia(format!("bad base64: {e}")))
}

fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{mime_type};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn parse_data_url(raw: &str) -> Option<(String, Vec<u8>)> {
    let rest = raw.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    // Recorders sometimes append codec parameters (`audio/webm;codecs=opus`).
    let mime_type = mime_type.split(';').next().unwrap_or(mime_type).trim();
    if mime_type.is_empty() {
        return None;
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    Some((mime_type.to_string(), bytes))
}
