use std::sync::Arc;

use anyhow::{anyhow, Result};
use retouch_contracts::history::ImageVersion;
use retouch_contracts::models::{ModelSelection, ModelSelector, CAPABILITY_EDIT};
use retouch_contracts::requests::GenerationRequest;
use serde_json::{Map, Value};

use crate::classify::{classify_response, GenerationError};
use crate::codec::InlineImage;
use crate::config::EngineConfig;
use crate::expand::compose_expand_canvas;
use crate::providers::{error_chain_text, ImageProvider, ImageProviderRegistry, ProviderRequest};

const ERROR_TEXT_LIMIT: usize = 512;

/// Executes one generation request against one provider/model pair.
///
/// Every operation kind goes through the same path: build operands, send
/// them with the request's instruction, classify the reply.
#[derive(Clone)]
pub struct GenerationClient {
    provider: Arc<dyn ImageProvider>,
    model: String,
    provider_options: Map<String, Value>,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn ImageProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            provider_options: Map::new(),
        }
    }

    /// Resolves the model through the registry and wires the matching provider.
    pub fn from_config(
        config: &EngineConfig,
        requested_model: Option<&str>,
    ) -> Result<(Self, ModelSelection)> {
        let selector = ModelSelector::new(None);
        let requested = requested_model.or(config.image_model.as_deref());
        let selection = selector
            .select(requested, CAPABILITY_EDIT)
            .map_err(|err| anyhow!(err))?;
        let providers = ImageProviderRegistry::with_defaults(config);
        let provider = providers
            .get(&selection.model.provider)
            .ok_or_else(|| anyhow!("no provider registered for '{}'", selection.model.provider))?;
        let client = Self::new(provider, selection.model.name.clone())
            .with_option("request_timeout", Value::from(config.request_timeout_s));
        Ok((client, selection))
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.provider_options.insert(key.to_string(), value);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Sends `request` with `head` as the primary operand and returns the new
    /// version. No state is touched here; committing is the caller's job.
    pub fn submit(
        &self,
        request: &GenerationRequest,
        head: &ImageVersion,
    ) -> Result<ImageVersion, GenerationError> {
        let provider_request = ProviderRequest {
            model: self.model.clone(),
            instruction: request.instruction(),
            images: operands(request, head)?,
            provider_options: self.provider_options.clone(),
        };
        let payload = self
            .provider
            .generate(&provider_request)
            .map_err(|err| GenerationError::Transport(error_chain_text(&err, ERROR_TEXT_LIMIT)))?;
        let image = classify_response(&payload)?;
        Ok(ImageVersion::generated(
            request.kind().as_str(),
            image.mime_type,
            image.bytes,
        ))
    }
}

fn operands(
    request: &GenerationRequest,
    head: &ImageVersion,
) -> Result<Vec<InlineImage>, GenerationError> {
    match request {
        GenerationRequest::Edit { .. }
        | GenerationRequest::Filter { .. }
        | GenerationRequest::Adjust { .. } => Ok(vec![InlineImage::from_version(head)]),
        GenerationRequest::Combine { second_image, .. } => Ok(vec![
            InlineImage::from_version(head),
            InlineImage::from_version(second_image),
        ]),
        GenerationRequest::Expand { direction, .. } => compose_expand_canvas(&head.bytes, *direction)
            .map(|canvas| vec![canvas])
            .map_err(|err| {
                GenerationError::Transport(format!(
                    "expand canvas failed: {}",
                    error_chain_text(&err, ERROR_TEXT_LIMIT)
                ))
            }),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use anyhow::{bail, Result};
    use serde_json::{json, Value};

    use crate::codec::InlineImage;
    use crate::providers::{ImageProvider, ProviderRequest};

    /// Replays canned payloads and records every request it receives.
    pub(crate) struct ScriptedProvider {
        replies: Mutex<Vec<Result<Value, String>>>,
        pub(crate) seen: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: Vec<Result<Value, String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn seen(&self) -> Vec<ProviderRequest> {
            self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
        }
    }

    impl ImageProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, request: &ProviderRequest) -> Result<Value> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            let next = match self.replies.lock() {
                Ok(mut replies) if !replies.is_empty() => replies.remove(0),
                _ => bail!("no scripted reply left"),
            };
            next.map_err(anyhow::Error::msg)
        }
    }

    pub(crate) fn image_reply(bytes: &[u8]) -> Result<Value, String> {
        let image = InlineImage::new("image/png", bytes.to_vec());
        Ok(json!({
            "candidates": [{
                "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": image.base64() } }] },
                "finishReason": "STOP"
            }]
        }))
    }
}
