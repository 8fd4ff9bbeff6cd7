use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

use crate::codec::InlineImage;

/// Why a generation call produced no usable image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("request was blocked ({reason}){}", detail_suffix(.message.as_deref()))]
    PolicyBlocked {
        reason: String,
        message: Option<String>,
    },
    #[error("image generation stopped unexpectedly ({0}); this is often related to safety settings, try rephrasing your prompt")]
    AbnormalCompletion(String),
    #[error("{}", no_image_message(.0.as_deref()))]
    NoImageReturned(Option<String>),
    #[error("generation request failed: {0}")]
    Transport(String),
}

fn detail_suffix(message: Option<&str>) -> String {
    message
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!(": {value}"))
        .unwrap_or_default()
}

fn no_image_message(text: Option<&str>) -> String {
    match text {
        Some(text) => format!("the model did not return an image; it replied with text: \"{text}\""),
        None => "the model did not return an image; this can happen due to safety filters or if the request is too complex, try rephrasing your prompt to be more direct".to_string(),
    }
}

/// Normalizes a `generateContent` response into one image or a typed failure.
///
/// Order matters: a block reason wins even when an image is also present, and
/// an abnormal finish reason wins over a text-only reply.
pub fn classify_response(payload: &Value) -> Result<InlineImage, GenerationError> {
    let feedback = payload
        .get("promptFeedback")
        .or_else(|| payload.get("prompt_feedback"));
    if let Some(reason) = feedback
        .and_then(|row| row.get("blockReason").or_else(|| row.get("block_reason")))
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
    {
        let message = feedback
            .and_then(|row| {
                row.get("blockReasonMessage")
                    .or_else(|| row.get("block_reason_message"))
            })
            .and_then(Value::as_str)
            .map(str::to_string);
        return Err(GenerationError::PolicyBlocked {
            reason: reason.to_string(),
            message,
        });
    }

    if let Some(image) = first_inline_image(payload)? {
        return Ok(image);
    }

    let finish_reason = candidates(payload)
        .first()
        .and_then(|candidate| {
            candidate
                .get("finishReason")
                .or_else(|| candidate.get("finish_reason"))
        })
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(reason) = finish_reason {
        if !reason.eq_ignore_ascii_case("STOP") {
            return Err(GenerationError::AbnormalCompletion(reason.to_string()));
        }
    }

    let text = response_text(payload);
    Err(GenerationError::NoImageReturned(
        Some(text).filter(|value| !value.is_empty()),
    ))
}

fn candidates(payload: &Value) -> &[Value] {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn parts(candidate: &Value) -> &[Value] {
    candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn first_inline_image(payload: &Value) -> Result<Option<InlineImage>, GenerationError> {
    for candidate in candidates(payload) {
        for part in parts(candidate) {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                GenerationError::Transport(format!("image payload base64 decode failed: {err}"))
            })?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .unwrap_or("image/png");
            return Ok(Some(InlineImage::new(mime_type, bytes)));
        }
    }
    Ok(None)
}

fn response_text(payload: &Value) -> String {
    candidates(payload)
        .iter()
        .flat_map(parts)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn image_part(data: &[u8]) -> Value {
        json!({ "inlineData": { "mimeType": "image/jpeg", "data": BASE64.encode(data) } })
    }

    #[test]
    fn image_payload_is_returned_with_its_mime_type() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "here you go" }, image_part(b"jpeg-bytes")] },
                "finishReason": "STOP"
            }]
        });
        let image = classify_response(&payload).unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.bytes, b"jpeg-bytes");
        assert!(image.to_data_url().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn block_reason_takes_precedence_over_image() {
        let payload = json!({
            "promptFeedback": { "blockReason": "SAFETY", "blockReasonMessage": "unsafe request" },
            "candidates": [{ "content": { "parts": [image_part(b"img")] } }]
        });
        let err = classify_response(&payload).unwrap_err();
        assert_eq!(
            err,
            GenerationError::PolicyBlocked {
                reason: "SAFETY".to_string(),
                message: Some("unsafe request".to_string()),
            }
        );
        assert_eq!(err.to_string(), "request was blocked (SAFETY): unsafe request");
    }

    #[test]
    fn safety_finish_without_image_is_abnormal_not_missing() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "I can't help with that." }] },
                "finishReason": "SAFETY"
            }]
        });
        assert_eq!(
            classify_response(&payload),
            Err(GenerationError::AbnormalCompletion("SAFETY".to_string()))
        );
    }

    #[test]
    fn text_only_reply_is_no_image_with_explanation() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "  Which shirt " }, { "text": "do you mean? " }] },
                "finishReason": "STOP"
            }]
        });
        let err = classify_response(&payload).unwrap_err();
        assert_eq!(
            err,
            GenerationError::NoImageReturned(Some("Which shirt do you mean?".to_string()))
        );
        assert!(err.to_string().contains("Which shirt do you mean?"));
    }

    #[test]
    fn empty_response_is_no_image_without_text() {
        let err = classify_response(&json!({})).unwrap_err();
        assert_eq!(err, GenerationError::NoImageReturned(None));
        assert!(err.to_string().contains("rephrasing"));
    }

    #[test]
    fn snake_case_fields_and_later_candidates_are_scanned() {
        let payload = json!({
            "candidates": [
                { "content": { "parts": [{ "inline_data": { "data": "" } }] } },
                { "content": { "parts": [{ "inline_data": { "data": BASE64.encode(b"png") } }] } }
            ]
        });
        let image = classify_response(&payload).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, b"png");

        let blocked = json!({ "prompt_feedback": { "block_reason": "OTHER" } });
        assert!(matches!(
            classify_response(&blocked),
            Err(GenerationError::PolicyBlocked { ref reason, message: None }) if reason == "OTHER"
        ));
    }

    #[test]
    fn corrupt_image_payload_is_transport_failure() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "inlineData": { "data": "%%%" } }] } }]
        });
        assert!(matches!(
            classify_response(&payload),
            Err(GenerationError::Transport(_))
        ));
    }
}
