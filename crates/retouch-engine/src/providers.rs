use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::Rgba;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::codec::{decode_rgba, encode_png, InlineImage};
use crate::config::{EngineConfig, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT_S};

/// One call to an image model: operand images first, then the instruction.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub instruction: String,
    pub images: Vec<InlineImage>,
    pub provider_options: Map<String, Value>,
}

/// Providers return the raw `generateContent`-shaped payload; interpreting it
/// is left to `classify_response`.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ProviderRequest) -> Result<Value>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(DryrunProvider);
        registry.register(GeminiProvider::from_config(config));
        registry
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        let api_base = api_base.into().trim().trim_end_matches('/').to_string();
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_API_BASE.to_string()
            } else {
                api_base
            },
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            http: HttpClient::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.api_base.clone(), config.api_key.clone())
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_contents(request: &ProviderRequest) -> Vec<Value> {
        let mut parts = Vec::with_capacity(request.images.len() + 1);
        for image in &request.images {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.base64(),
                }
            }));
        }
        parts.push(json!({ "text": request.instruction }));
        parts
    }

    fn build_payload(request: &ProviderRequest) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            Value::Array(vec![json!({
                "role": "user",
                "parts": Self::build_contents(request),
            })]),
        );
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseModalities": ["IMAGE", "TEXT"] }),
        );
        if let Some(safety_settings) = request
            .provider_options
            .get("safety_settings")
            .and_then(Value::as_array)
            .cloned()
        {
            payload.insert("safetySettings".to_string(), Value::Array(safety_settings));
        }
        Value::Object(payload)
    }

    fn request_timeout_seconds(request: &ProviderRequest) -> f64 {
        value_as_f64(
            request.provider_options.get("request_timeout"),
            DEFAULT_REQUEST_TIMEOUT_S,
            15.0,
            300.0,
        )
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<Value> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs_f64(Self::request_timeout_seconds(
                request,
            )))
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

/// Offline provider: tints the first operand with a colour derived from the
/// instruction and paints transparent pixels solid, so expand canvases come
/// back filled.
pub struct DryrunProvider;

const DRYRUN_BLANK_SIZE: u32 = 64;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<Value> {
        let (r, g, b) = color_from_instruction(&request.instruction);
        let mut canvas = match request.images.first() {
            Some(image) => decode_rgba(&image.bytes).context("dryrun operand decode failed")?,
            None => image::RgbaImage::new(DRYRUN_BLANK_SIZE, DRYRUN_BLANK_SIZE),
        };
        for pixel in canvas.pixels_mut() {
            let Rgba([pr, pg, pb, alpha]) = *pixel;
            *pixel = if alpha == 0 {
                Rgba([r, g, b, 255])
            } else {
                Rgba([blend(pr, r), blend(pg, g), blend(pb, b), alpha])
            };
        }
        let bytes = encode_png(canvas)?;
        let image = InlineImage::new("image/png", bytes);
        Ok(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "inlineData": {
                            "mimeType": image.mime_type,
                            "data": image.base64(),
                        }
                    }]
                },
                "finishReason": "STOP"
            }],
            "modelVersion": request.model,
        }))
    }
}

fn blend(base: u8, tint: u8) -> u8 {
    ((u16::from(base) * 3 + u16::from(tint)) / 4) as u8
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(instruction.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn value_as_f64(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let parsed = value.and_then(|row| match row {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    });
    parsed.unwrap_or(default).clamp(min, max)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Flattens an error and its causes into one line, skipping repeats.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
