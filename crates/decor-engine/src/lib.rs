use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use decor_contracts::design::{
    parse_furniture_report, shopping_links, DesignRequest, FurnitureItem, FurnitureReport,
    GeneratedRoomImage, RoomImage, ShoppingLink,
};
use decor_contracts::error::DecorError;
use decor_contracts::events::{DesignEvent, EventWriter};
use decor_contracts::models::{ModelProvider, ModelSpec};
use image::{Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_ITEMS: usize = 5;
pub const MAX_ITEMS_LIMIT: usize = 20;

const VISION_MAX_DIM: u32 = 1024;
const ERROR_TEXT_MAX_CHARS: usize = 512;
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "IMAGE_PROHIBITED_CONTENT",
    "PROHIBITED_CONTENT",
    "RECITATION",
    "IMAGE_RECITATION",
    "BLOCKLIST",
    "SPII",
];

const DRYRUN_FURNITURE_RESPONSE: &str = r#"```json
[
  {"name": "Linen Sofa", "color": "Oatmeal", "searchQuery": "oatmeal linen three seat sofa"},
  {"name": "Round Coffee Table", "color": "Walnut", "searchQuery": "round walnut coffee table"},
  {"name": "Arc Floor Lamp", "color": "Brushed Brass", "searchQuery": "brushed brass arc floor lamp"}
]
```"#;

#[derive(Clone)]
pub struct DecorConfig {
    api_key: String,
    api_base: String,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for DecorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecorConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl DecorConfig {
    pub fn new(api_key: &str) -> Result<Self, DecorError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(DecorError::Configuration("API key is blank".to_string()));
        }
        Ok(Self {
            api_key: api_key.to_string(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            request_timeout: None,
        })
    }

    pub fn from_env() -> Result<Self, DecorError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DecorError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let Some(api_key) = non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY"))
        else {
            return Err(DecorError::Configuration(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let mut config = Self::new(&api_key)?;
        if let Some(api_base) = non_empty("GEMINI_API_BASE") {
            config = config.with_api_base(&api_base);
        }
        if let Some(raw) = non_empty("DECOR_REQUEST_TIMEOUT_SECS") {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(|| {
                    DecorError::Configuration(format!(
                        "DECOR_REQUEST_TIMEOUT_SECS must be a positive integer, got '{raw}'"
                    ))
                })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        let trimmed = api_base.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.api_base = trimmed.to_string();
        }
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

pub trait GeminiTransport: Send + Sync {
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value>;
}

pub struct HttpTransport {
    config: DecorConfig,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(config: &DecorConfig) -> Result<Self, DecorError> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| {
                DecorError::Configuration(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            config: config.clone(),
            http,
        })
    }
}

impl GeminiTransport for HttpTransport {
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.config.endpoint_for_model(model);
        // reqwest errors embed the full URL, which carries the key.
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.config.api_key.as_str())])
            .json(payload)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

pub trait ImageSynthesizer: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn synthesize<'a>(
        &self,
        request: &'a DesignRequest,
    ) -> Result<GeneratedRoomImage<'a>, DecorError>;
}

pub trait FurnitureExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn extract_report(&self, image: &RoomImage) -> Result<FurnitureReport, DecorError>;

    fn extract_furniture(&self, image: &RoomImage) -> Result<Vec<FurnitureItem>, DecorError> {
        self.extract_report(image).map(|report| report.items)
    }
}

pub struct GeminiSynthesizer<T: GeminiTransport = HttpTransport> {
    transport: T,
    model: String,
}

impl<T: GeminiTransport> GeminiSynthesizer<T> {
    pub fn new(transport: T, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    fn build_payload(&self, request: &DesignRequest) -> Value {
        let source = request.source_image();
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(source.bytes(), source.mime_type()),
                    { "text": request.instruction() },
                ],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
            },
        })
    }
}

impl<T: GeminiTransport> ImageSynthesizer for GeminiSynthesizer<T> {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn synthesize<'a>(
        &self,
        request: &'a DesignRequest,
    ) -> Result<GeneratedRoomImage<'a>, DecorError> {
        let payload = self.build_payload(request);
        let response = self
            .transport
            .generate_content(&self.model, &payload)
            .map_err(|err| DecorError::Generation(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)))?;
        if let Some(reason) = blocked_reason(&response) {
            return Err(DecorError::Generation(reason));
        }

        let images = extract_image_items(&response)
            .map_err(|err| DecorError::Generation(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)))?;
        let Some(bytes) = images.into_iter().next() else {
            let text = extract_text(&response);
            let message = if text.is_empty() {
                format!("{} returned no image", self.model)
            } else {
                format!(
                    "{} returned no image: {}",
                    self.model,
                    truncate_text(&text, ERROR_TEXT_MAX_CHARS)
                )
            };
            return Err(DecorError::Generation(message));
        };
        let image = RoomImage::decode(bytes).map_err(|err| {
            DecorError::Generation(format!("generated image could not be decoded: {err:#}"))
        })?;
        Ok(GeneratedRoomImage::new(image, request, self.model.clone()))
    }
}

pub struct GeminiExtractor<T: GeminiTransport = HttpTransport> {
    transport: T,
    model: String,
    max_items: usize,
}

impl<T: GeminiTransport> GeminiExtractor<T> {
    pub fn new(transport: T, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
            max_items: DEFAULT_MAX_ITEMS,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.clamp(1, MAX_ITEMS_LIMIT);
        self
    }

    fn build_payload(&self, image: &RoomImage) -> Value {
        let (bytes, mime_type) = image.vision_payload(VISION_MAX_DIM);
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(&bytes, &mime_type),
                    { "text": extraction_instruction(self.max_items) },
                ],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
            },
        })
    }
}

impl<T: GeminiTransport> FurnitureExtractor for GeminiExtractor<T> {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn extract_report(&self, image: &RoomImage) -> Result<FurnitureReport, DecorError> {
        let payload = self.build_payload(image);
        let response = self
            .transport
            .generate_content(&self.model, &payload)
            .map_err(|err| DecorError::Extraction(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)))?;
        if let Some(reason) = blocked_reason(&response) {
            return Err(DecorError::Extraction(reason));
        }
        let text = extract_text(&response);
        if text.is_empty() {
            return Err(DecorError::Extraction(format!(
                "{} returned no text",
                self.model
            )));
        }
        parse_furniture_report(&text)
    }
}

pub fn extraction_instruction(max_items: usize) -> String {
    format!(
        "Analyze this interior design image. Identify up to {max_items} distinct furniture or \
         decor items visible.\n\
         Return the result as a JSON list.\n\
         Each item must have:\n\
         - \"name\": The name of the item (e.g., \"Velvet Sofa\")\n\
         - \"color\": The specific color/material\n\
         - \"searchQuery\": A precise Google Shopping search query\n\
         Return ONLY raw JSON. No markdown formatting."
    )
}

pub struct DryrunSynthesizer {
    model: String,
}

impl DryrunSynthesizer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for DryrunSynthesizer {
    fn default() -> Self {
        Self::new("dryrun-image-1")
    }
}

impl ImageSynthesizer for DryrunSynthesizer {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn synthesize<'a>(
        &self,
        request: &'a DesignRequest,
    ) -> Result<GeneratedRoomImage<'a>, DecorError> {
        let source = request.source_image();
        let (r, g, b) = color_from_prompt(&request.instruction());
        let canvas = RgbImage::from_pixel(source.width(), source.height(), Rgb([r, g, b]));
        let image = RoomImage::from_rgb(canvas)
            .map_err(|err| DecorError::Generation(format!("{err:#}")))?;
        Ok(GeneratedRoomImage::new(image, request, self.model.clone()))
    }
}

pub struct DryrunExtractor {
    model: String,
    response: String,
}

impl DryrunExtractor {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response: DRYRUN_FURNITURE_RESPONSE.to_string(),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }
}

impl Default for DryrunExtractor {
    fn default() -> Self {
        Self::new("dryrun-vision-1")
    }
}

impl FurnitureExtractor for DryrunExtractor {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn extract_report(&self, _image: &RoomImage) -> Result<FurnitureReport, DecorError> {
        parse_furniture_report(&self.response)
    }
}

pub fn synthesizer_for(
    model: &ModelSpec,
    config: Option<&DecorConfig>,
) -> Result<Box<dyn ImageSynthesizer>, DecorError> {
    match model.provider {
        ModelProvider::Dryrun => Ok(Box::new(DryrunSynthesizer::new(model.name.clone()))),
        ModelProvider::Gemini => {
            let config = require_config(config, model)?;
            Ok(Box::new(GeminiSynthesizer::new(
                HttpTransport::new(config)?,
                model.name.clone(),
            )))
        }
    }
}

pub fn extractor_for(
    model: &ModelSpec,
    config: Option<&DecorConfig>,
    max_items: usize,
) -> Result<Box<dyn FurnitureExtractor>, DecorError> {
    match model.provider {
        ModelProvider::Dryrun => Ok(Box::new(DryrunExtractor::new(model.name.clone()))),
        ModelProvider::Gemini => {
            let config = require_config(config, model)?;
            Ok(Box::new(
                GeminiExtractor::new(HttpTransport::new(config)?, model.name.clone())
                    .with_max_items(max_items),
            ))
        }
    }
}

fn require_config<'c>(
    config: Option<&'c DecorConfig>,
    model: &ModelSpec,
) -> Result<&'c DecorConfig, DecorError> {
    config.ok_or_else(|| {
        DecorError::Configuration(format!(
            "model '{}' ({}) needs GEMINI_API_KEY or GOOGLE_API_KEY",
            model.name,
            model.provider.as_str()
        ))
    })
}

#[derive(Debug, Clone)]
pub struct DesignOutcome<'a> {
    pub generated: GeneratedRoomImage<'a>,
    pub report: FurnitureReport,
}

impl DesignOutcome<'_> {
    pub fn items(&self) -> &[FurnitureItem] {
        &self.report.items
    }

    pub fn links(&self) -> Vec<ShoppingLink> {
        shopping_links(&self.report.items)
    }
}

pub struct DesignEngine {
    synthesizer: Box<dyn ImageSynthesizer>,
    extractor: Box<dyn FurnitureExtractor>,
    events: Option<EventWriter>,
}

impl DesignEngine {
    pub fn new(
        synthesizer: Box<dyn ImageSynthesizer>,
        extractor: Box<dyn FurnitureExtractor>,
    ) -> Self {
        Self {
            synthesizer,
            extractor,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    // Event writes never fail a run; a broken log only costs a warning.
    pub fn emit_event(&self, event: DesignEvent, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event, map_object(payload)) {
            eprintln!("decor warning: failed to record {event} event: {err:#}");
        }
    }

    pub fn run<'a>(&self, request: &'a DesignRequest) -> Result<DesignOutcome<'a>, DecorError> {
        let generated = self.synthesize(request)?;
        let report = self.extract(generated.image())?;
        self.finish(&report, None);
        Ok(DesignOutcome { generated, report })
    }

    pub fn synthesize<'a>(
        &self,
        request: &'a DesignRequest,
    ) -> Result<GeneratedRoomImage<'a>, DecorError> {
        let source = request.source_image();
        self.emit_event(
            DesignEvent::Started,
            json!({
                "style": request.style_directive(),
                "notes": request.notes(),
                "source": image_summary(source),
                "synthesizer": self.synthesizer.name(),
                "model": self.synthesizer.model(),
            }),
        );
        match self.synthesizer.synthesize(request) {
            Ok(generated) => {
                self.emit_event(
                    DesignEvent::ImageGenerated,
                    json!({
                        "model": generated.model(),
                        "image": image_summary(generated.image()),
                    }),
                );
                Ok(generated)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    pub fn extract(&self, image: &RoomImage) -> Result<FurnitureReport, DecorError> {
        match self.extractor.extract_report(image) {
            Ok(report) => {
                self.emit_event(
                    DesignEvent::FurnitureExtracted,
                    json!({
                        "extractor": self.extractor.name(),
                        "model": self.extractor.model(),
                        "count": report.items.len(),
                        "dropped": report.dropped,
                        "items": report.items,
                    }),
                );
                Ok(report)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    pub fn finish(&self, report: &FurnitureReport, artifact: Option<&Path>) {
        self.emit_event(
            DesignEvent::Finished,
            json!({
                "items": report.items.len(),
                "artifact": artifact.map(|path| path.to_string_lossy().to_string()),
            }),
        );
    }

    fn record_failure(&self, err: &DecorError) {
        self.emit_event(
            DesignEvent::Failed,
            json!({
                "stage": err.stage(),
                "error": err.message(),
            }),
        );
    }
}

fn image_summary(image: &RoomImage) -> Value {
    json!({
        "width": image.width(),
        "height": image.height(),
        "mime_type": image.mime_type(),
        "bytes": image.bytes().len(),
    })
}

fn inline_image_part(bytes: &[u8], mime_type: &str) -> Value {
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": BASE64.encode(bytes),
        }
    })
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, ERROR_TEXT_MAX_CHARS)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

// Refusals arrive as HTTP 200.
fn blocked_reason(response: &Value) -> Option<String> {
    if let Some(feedback) = response.get("promptFeedback").and_then(Value::as_object) {
        if let Some(reason) = feedback.get("blockReason").and_then(Value::as_str) {
            let message = feedback
                .get("blockReasonMessage")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("prompt blocked: {reason}"));
            return Some(message);
        }
    }
    let finish_reason = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)?;
    BLOCKING_FINISH_REASONS
        .contains(&finish_reason)
        .then(|| format!("content blocked by safety filter: {finish_reason}"))
}

fn candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|candidate| candidate.get("content"))
                .filter_map(|content| content.get("parts"))
                .filter_map(Value::as_array)
                .flatten()
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn extract_image_items(response: &Value) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    for part in candidate_parts(response) {
        let data = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        out.push(bytes);
    }
    Ok(out)
}

fn extract_text(response: &Value) -> String {
    candidate_parts(response)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
        .trim()
        .to_string()
}

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

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
