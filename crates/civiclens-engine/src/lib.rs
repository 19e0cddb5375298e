use std::env;
use std::time::Duration;

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use civiclens_contracts::chat::ChatMessage;
use civiclens_contracts::events::{EventPayload, EventWriter};
use civiclens_contracts::grounding::{
    dedupe_by_uri, fallback_address, first_map_link, grounding_chunks, response_text, web_sources,
    GeocodeResult, SearchResult,
};
use civiclens_contracts::issue::{clamp_confidence, AnalysisResult, Severity, ISSUE_TYPES};
use civiclens_contracts::models::ModelSelector;
use civiclens_contracts::schema::{analysis_schema, FieldKind, SchemaSpec};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_VISION_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_SEARCH_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_GEOCODE_MODEL: &str = "gemini-2.5-flash";

pub const CHAT_SYSTEM_POLICY: &str = "You are CivicBot, a helpful assistant for the CivicLens \
     application. You help users understand how to report issues, explain civic processes, and \
     provide general safety advice. Keep answers concise.";

pub const CHAT_GREETING: &str =
    "Hi! I am CivicBot. Ask me anything about reporting issues or civic safety.";

/// Reply recorded when a chat call succeeds but yields no usable text.
pub const CHAT_SOFT_FALLBACK: &str = "Sorry, I didn't get that.";
/// Reply recorded when a chat call errors outright.
pub const CHAT_HARD_FALLBACK: &str =
    "I'm having trouble connecting right now. Please try again later.";

pub const NO_RESULTS_TEXT: &str = "No results found.";
pub const SEARCH_FAILURE_TEXT: &str = "Sorry, I couldn't perform the search at this time.";

const GEOCODE_PROMPT: &str = "What is the precise street address of this location?";

/// Upper bound on transcript messages re-sent per chat turn. The owned
/// transcript itself is append-only and unbounded; only the request window
/// is capped.
pub const MAX_RETAINED_TURNS: usize = 40;

pub const SEVERITY_RUBRIC: &[(Severity, &str)] = &[
    (
        Severity::High,
        "Immediate danger to life or vehicles (e.g., open manhole, deep pothole on a through road).",
    ),
    (
        Severity::Medium,
        "Potential hazard or significant sanitation issue (e.g., garbage pile, shallow pothole).",
    ),
    (
        Severity::Low,
        "Cosmetic issue or minor nuisance (e.g., faded paint, small litter).",
    ),
    (Severity::None, "The image shows no qualifying issue."),
];

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("empty result")]
    EmptyResult,
}

#[derive(Debug, Clone)]
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroundingTool {
    WebSearch,
    Maps { lat: f64, lng: f64 },
}

/// Declared response shape of one generation call: free text, JSON matching
/// a declared schema, or text plus retrieval-tool citations.
#[derive(Debug, Clone)]
pub enum ResponseContract {
    Text,
    Json(SchemaSpec),
    Grounded(GroundingTool),
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub prior_turns: Vec<ChatMessage>,
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub contract: ResponseContract,
    pub options: Map<String, Value>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            prior_turns: Vec::new(),
            prompt: prompt.into(),
            image: None,
            contract: ResponseContract::Text,
            options: Map::new(),
        }
    }
}

/// Raw decoded payload of one generation call. `structured` is populated only
/// for JSON-contract calls, after validation against the declared schema.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub payload: Value,
    pub structured: Option<Value>,
}

impl RawResponse {
    pub fn text(&self) -> Option<String> {
        response_text(&self.payload)
    }

    pub fn grounding_chunks(&self) -> Vec<Value> {
        grounding_chunks(&self.payload)
    }
}

/// The single mockable boundary to the reasoning service. Implementations
/// carry no civic semantics; fallback policy belongs to the callers.
pub trait ReasoningClient: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerateRequest) -> Result<RawResponse, ServiceError>;
}

pub struct GeminiClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: HttpClient::new(),
        }
    }

    /// Constructed once at startup; `None` when no credential is configured.
    pub fn from_env() -> Option<Self> {
        let api_key = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))?;
        let api_base = non_empty_env("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Some(Self::new(api_base, api_key))
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

    pub fn build_payload(request: &GenerateRequest) -> Value {
        let mut contents = Vec::new();
        for turn in &request.prior_turns {
            contents.push(json!({
                "role": turn.role.as_str(),
                "parts": [{ "text": turn.text }],
            }));
        }
        let mut parts = Vec::new();
        if let Some(image) = &request.image {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": BASE64.encode(&image.bytes),
                }
            }));
        }
        parts.push(json!({ "text": request.prompt }));
        contents.push(json!({ "role": "user", "parts": parts }));

        let mut payload = Map::new();
        payload.insert("contents".to_string(), Value::Array(contents));

        if let Some(system) = &request.system_instruction {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": system }] }),
            );
        }

        match &request.contract {
            ResponseContract::Text => {}
            ResponseContract::Json(schema) => {
                payload.insert(
                    "generationConfig".to_string(),
                    json!({
                        "responseMimeType": "application/json",
                        "responseSchema": schema.response_schema_value(),
                    }),
                );
            }
            ResponseContract::Grounded(GroundingTool::WebSearch) => {
                payload.insert("tools".to_string(), json!([{ "googleSearch": {} }]));
            }
            ResponseContract::Grounded(GroundingTool::Maps { lat, lng }) => {
                payload.insert("tools".to_string(), json!([{ "googleMaps": {} }]));
                payload.insert(
                    "toolConfig".to_string(),
                    json!({
                        "retrievalConfig": {
                            "latLng": { "latitude": lat, "longitude": lng }
                        }
                    }),
                );
            }
        }

        Value::Object(payload)
    }
}

impl ReasoningClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<RawResponse, ServiceError> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        let timeout_s = request_timeout_seconds(&request.options);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(Duration::from_secs_f64(timeout_s))
            .json(&payload)
            .send()
            .map_err(|err| ServiceError::Transport(format!("request failed ({endpoint}): {err}")))?;
        let payload = response_json_or_error(response)?;

        let structured = match &request.contract {
            ResponseContract::Json(schema) => Some(decode_structured(&payload, schema)?),
            _ => None,
        };

        Ok(RawResponse { payload, structured })
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, ServiceError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| ServiceError::Transport(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(ServiceError::Transport(format!(
            "service returned {code}: {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body).map_err(|_| {
        ServiceError::MalformedResponse(format!(
            "invalid JSON payload: {}",
            truncate_text(&body, 512)
        ))
    })
}

fn decode_structured(payload: &Value, schema: &SchemaSpec) -> Result<Value, ServiceError> {
    let Some(text) = response_text(payload) else {
        return Err(ServiceError::MalformedResponse(
            "JSON contract response carried no text".to_string(),
        ));
    };
    let parsed: Value = serde_json::from_str(&text).map_err(|err| {
        ServiceError::MalformedResponse(format!("JSON contract response did not parse: {err}"))
    })?;
    schema
        .validate(&parsed)
        .map_err(ServiceError::MalformedResponse)?;
    Ok(parsed)
}

/// Deterministic offline client. Produces service-shaped payloads from the
/// request alone so every flow stays usable without a credential.
pub struct DryrunClient;

impl DryrunClient {
    fn structured_for(schema: &SchemaSpec) -> Result<Value, ServiceError> {
        let mut object = Map::new();
        for field in &schema.fields {
            let value = match &field.kind {
                FieldKind::Text => Value::String(dryrun_text_for(&field.name)),
                FieldKind::Number => json!(72),
                FieldKind::Label { allowed } => allowed
                    .get(allowed.len() / 2)
                    .map(|label| Value::String(label.clone()))
                    .unwrap_or(Value::Null),
            };
            object.insert(field.name.clone(), value);
        }
        let structured = Value::Object(object);
        schema
            .validate(&structured)
            .map_err(ServiceError::MalformedResponse)?;
        Ok(structured)
    }
}

impl ReasoningClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<RawResponse, ServiceError> {
        match &request.contract {
            ResponseContract::Json(schema) => {
                let structured = Self::structured_for(schema)?;
                let text = serde_json::to_string(&structured)
                    .map_err(|err| ServiceError::MalformedResponse(err.to_string()))?;
                Ok(RawResponse {
                    payload: text_payload(&text),
                    structured: Some(structured),
                })
            }
            ResponseContract::Grounded(GroundingTool::WebSearch) => {
                let text = format!(
                    "Offline search preview for \"{}\". Configure a service API key for live, \
                     grounded answers.",
                    truncate_text(request.prompt.trim(), 120)
                );
                let mut payload = text_payload(&text);
                payload["candidates"][0]["groundingMetadata"] = json!({
                    "groundingChunks": [
                        {
                            "web": {
                                "uri": "https://example.org/civic-services",
                                "title": "Civic services directory",
                            }
                        },
                        {
                            "web": {
                                "uri": "https://example.org/road-maintenance",
                                "title": "Road maintenance FAQ",
                            }
                        },
                    ]
                });
                Ok(RawResponse {
                    payload,
                    structured: None,
                })
            }
            // No address and no citations: callers surface the coordinate
            // fallback instead of a fabricated street address.
            ResponseContract::Grounded(GroundingTool::Maps { .. }) => Ok(RawResponse {
                payload: json!({ "candidates": [] }),
                structured: None,
            }),
            ResponseContract::Text => {
                let text = format!(
                    "Offline preview reply. You said: {}",
                    truncate_text(request.prompt.trim(), 120)
                );
                Ok(RawResponse {
                    payload: text_payload(&text),
                    structured: None,
                })
            }
        }
    }
}

fn dryrun_text_for(field: &str) -> String {
    match field {
        "issue_type" => "Pothole".to_string(),
        "description" => "Placeholder assessment generated without a live vision service.".to_string(),
        "recommended_action" => "Configure a service API key for a real analysis.".to_string(),
        other => format!("Placeholder value for {other}."),
    }
}

fn text_payload(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }] }
        }]
    })
}

/// Full classifier instruction: the issue vocabulary and severity rubric are
/// emitted from the same constants the decoder enforces, so prompt and
/// validation cannot drift.
pub fn analysis_instruction() -> String {
    let mut out = String::new();
    out.push_str(
        "You are an expert AI Civil Engineer and Public Safety Inspector for \"CivicLens\".\n\
         Analyze the provided image to identify civic infrastructure issues.\n\n\
         Possible Issue Types:\n",
    );
    for issue in ISSUE_TYPES {
        if *issue == "None" {
            out.push_str("- None (if the image looks normal or irrelevant)\n");
        } else {
            out.push_str("- ");
            out.push_str(issue);
            out.push('\n');
        }
    }
    out.push_str("\nSeverity Criteria:\n");
    for (severity, rubric) in SEVERITY_RUBRIC {
        out.push_str("- ");
        out.push_str(severity.as_str());
        out.push_str(": ");
        out.push_str(rubric);
        out.push('\n');
    }
    out.push_str(
        "\nProvide a structured analysis returning exactly:\n\
         - issue_type: The category of the problem.\n\
         - confidence: A score from 0-100.\n\
         - severity: High, Medium, Low, or None.\n\
         - recommended_action: A short, actionable step for the maintenance team.\n\
         - description: A brief visual description of the issue.\n",
    );
    out
}

fn analysis_prompt(location_hint: Option<&str>) -> String {
    let base = analysis_instruction();
    match location_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        Some(hint) => format!(
            "{base}\n\nContext: The image was reported at location: {hint}. Consider this in \
             your analysis if relevant."
        ),
        None => base,
    }
}

/// Orchestrates the three analysis flows over one shared client. Components
/// talk to nothing but the client; every flow resolves to a renderable value.
pub struct CivicAnalyst {
    client: Box<dyn ReasoningClient>,
    selector: ModelSelector,
    events: Option<EventWriter>,
    vision_model: Option<String>,
    search_model: Option<String>,
    chat_model: Option<String>,
    geocode_model: Option<String>,
}

impl CivicAnalyst {
    pub fn new(client: Box<dyn ReasoningClient>) -> Self {
        Self {
            client,
            selector: ModelSelector::new(None),
            events: None,
            vision_model: None,
            search_model: None,
            chat_model: None,
            geocode_model: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn set_vision_model(&mut self, model: Option<String>) {
        self.vision_model = model;
    }

    pub fn set_search_model(&mut self, model: Option<String>) {
        self.search_model = model;
    }

    pub fn set_chat_model(&mut self, model: Option<String>) {
        self.chat_model = model;
    }

    pub fn set_geocode_model(&mut self, model: Option<String>) {
        self.geocode_model = model;
    }

    pub fn analyze_image(
        &self,
        image_bytes: &[u8],
        mime_type: &str,
        location_hint: Option<&str>,
    ) -> AnalysisResult {
        let model = self.resolve_model(self.vision_model.as_deref(), "vision-json", DEFAULT_VISION_MODEL);
        let mut request = GenerateRequest::new(model, analysis_prompt(location_hint));
        request.image = Some(InlineImage {
            bytes: image_bytes.to_vec(),
            mime_type: mime_type.to_string(),
        });
        request.contract = ResponseContract::Json(analysis_schema());

        self.emit(
            "analysis_started",
            map_object(json!({
                "image_bytes": image_bytes.len(),
                "mime_type": mime_type,
                "has_location_hint": location_hint.is_some(),
            })),
        );

        let decoded = self
            .client
            .generate(&request)
            .and_then(|raw| decode_analysis(&raw));
        match decoded {
            Ok(result) => {
                self.emit(
                    "analysis_completed",
                    map_object(json!({
                        "issue_type": result.issue_type,
                        "severity": result.severity.as_str(),
                        "confidence": result.confidence,
                    })),
                );
                result
            }
            Err(err) => {
                self.emit(
                    "analysis_fallback",
                    map_object(json!({ "error": err.to_string() })),
                );
                AnalysisResult::degraded()
            }
        }
    }

    pub fn search_civic_info(&self, query: &str) -> SearchResult {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return SearchResult {
                text: NO_RESULTS_TEXT.to_string(),
                sources: Vec::new(),
            };
        }

        let model = self.resolve_model(
            self.search_model.as_deref(),
            "grounded-search",
            DEFAULT_SEARCH_MODEL,
        );
        let mut request = GenerateRequest::new(model, trimmed);
        request.contract = ResponseContract::Grounded(GroundingTool::WebSearch);

        self.emit(
            "search_started",
            map_object(json!({ "query": truncate_text(trimmed, 256) })),
        );

        match self.client.generate(&request) {
            Ok(raw) => {
                let sources = dedupe_by_uri(web_sources(&raw.grounding_chunks()));
                let text = match raw.text() {
                    Some(text) => text,
                    None => {
                        self.emit(
                            "search_empty",
                            map_object(json!({ "error": ServiceError::EmptyResult.to_string() })),
                        );
                        NO_RESULTS_TEXT.to_string()
                    }
                };
                self.emit(
                    "search_completed",
                    map_object(json!({ "sources": sources.len() })),
                );
                SearchResult { text, sources }
            }
            Err(err) => {
                self.emit(
                    "search_fallback",
                    map_object(json!({ "error": err.to_string() })),
                );
                SearchResult {
                    text: SEARCH_FAILURE_TEXT.to_string(),
                    sources: Vec::new(),
                }
            }
        }
    }

    pub fn reverse_geocode(&self, lat: f64, lng: f64) -> GeocodeResult {
        let model = self.resolve_model(
            self.geocode_model.as_deref(),
            "grounded-geocode",
            DEFAULT_GEOCODE_MODEL,
        );
        let mut request = GenerateRequest::new(model, GEOCODE_PROMPT);
        request.contract = ResponseContract::Grounded(GroundingTool::Maps { lat, lng });

        self.emit(
            "geocode_started",
            map_object(json!({ "lat": lat, "lng": lng })),
        );

        match self.client.generate(&request) {
            Ok(raw) => {
                let map_link = first_map_link(&raw.grounding_chunks());
                let address = match raw.text() {
                    Some(text) => text,
                    None => {
                        self.emit(
                            "geocode_empty",
                            map_object(json!({ "error": ServiceError::EmptyResult.to_string() })),
                        );
                        fallback_address(lat, lng)
                    }
                };
                self.emit(
                    "geocode_completed",
                    map_object(json!({ "has_map_link": map_link.is_some() })),
                );
                GeocodeResult { address, map_link }
            }
            Err(err) => {
                self.emit(
                    "geocode_fallback",
                    map_object(json!({ "error": err.to_string() })),
                );
                GeocodeResult {
                    address: fallback_address(lat, lng),
                    map_link: None,
                }
            }
        }
    }

    /// Runs one assistant turn against the session. The transcript always
    /// gains exactly one user and one model message per call.
    pub fn chat(&self, session: &mut ChatSession, message: &str) -> Result<String> {
        let pending = session.begin_turn(message)?;

        let model = self.resolve_model(self.chat_model.as_deref(), "chat", DEFAULT_CHAT_MODEL);
        let mut request = GenerateRequest::new(model, pending.message.clone());
        request.system_instruction = Some(CHAT_SYSTEM_POLICY.to_string());
        request.prior_turns = pending.history;

        self.emit(
            "chat_turn_started",
            map_object(json!({ "history_turns": request.prior_turns.len() })),
        );

        let reply = match self.client.generate(&request) {
            Ok(raw) => {
                let text = raw.text();
                if text.is_none() {
                    self.emit(
                        "chat_empty_reply",
                        map_object(json!({ "error": ServiceError::EmptyResult.to_string() })),
                    );
                }
                session.complete_turn(text)
            }
            Err(err) => {
                self.emit(
                    "chat_fallback",
                    map_object(json!({ "error": err.to_string() })),
                );
                session.fail_turn()
            }
        };

        Ok(reply)
    }

    fn resolve_model(&self, requested: Option<&str>, capability: &str, default: &str) -> String {
        match self.selector.select(requested, capability) {
            Ok(selection) => {
                if requested.is_some() {
                    if let Some(reason) = &selection.fallback_reason {
                        self.emit(
                            "model_fallback",
                            map_object(json!({
                                "capability": capability,
                                "reason": reason,
                            })),
                        );
                    }
                }
                selection.model.name
            }
            Err(_) => default.to_string(),
        }
    }

    // Best-effort: flow results never depend on the event log.
    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Some(events) = &self.events {
            let _ = events.emit(event_type, payload);
        }
    }
}

fn decode_analysis(raw: &RawResponse) -> Result<AnalysisResult, ServiceError> {
    let Some(object) = raw.structured.as_ref().and_then(Value::as_object) else {
        return Err(ServiceError::MalformedResponse(
            "classifier response carried no structured payload".to_string(),
        ));
    };

    let field_text = |name: &str| -> Result<String, ServiceError> {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::MalformedResponse(format!("missing field '{name}'")))
    };

    let severity = object
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse)
        .ok_or_else(|| {
            ServiceError::MalformedResponse("severity outside the declared set".to_string())
        })?;
    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .map(clamp_confidence)
        .ok_or_else(|| ServiceError::MalformedResponse("confidence is not numeric".to_string()))?;

    Ok(AnalysisResult {
        issue_type: field_text("issue_type")?,
        severity,
        confidence,
        description: field_text("description")?,
        recommended_action: field_text("recommended_action")?,
    })
}

#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub history: Vec<ChatMessage>,
    pub message: String,
}

/// Owns the assistant transcript for the lifetime of the chat surface.
/// Sends are serialized by the busy flag; replies never arrive out of order
/// because a second turn cannot begin while one is pending.
#[derive(Debug, Default)]
pub struct ChatSession {
    transcript: Vec<ChatMessage>,
    busy: bool,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_greeting() -> Self {
        Self {
            transcript: vec![ChatMessage::model(CHAT_GREETING)],
            busy: false,
        }
    }

    /// Restores a session from a previously rendered transcript.
    pub fn resume(transcript: Vec<ChatMessage>) -> Self {
        Self {
            transcript,
            busy: false,
        }
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Snapshots the history as it existed before this message, then appends
    /// the user turn and marks the session pending.
    pub fn begin_turn(&mut self, message: &str) -> Result<PendingTurn> {
        if self.busy {
            bail!("a turn is already pending; wait for the current reply");
        }
        let trimmed = message.trim();
        if trimmed.is_empty() {
            bail!("cannot send an empty message");
        }

        let start = self.transcript.len().saturating_sub(MAX_RETAINED_TURNS);
        let history = self.transcript[start..].to_vec();
        self.transcript.push(ChatMessage::user(trimmed));
        self.busy = true;
        Ok(PendingTurn {
            history,
            message: trimmed.to_string(),
        })
    }

    /// Records the model turn; an absent or blank reply becomes the soft
    /// fallback so the transcript never shows an unanswered send.
    pub fn complete_turn(&mut self, reply: Option<String>) -> String {
        let text = reply
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| CHAT_SOFT_FALLBACK.to_string());
        self.transcript.push(ChatMessage::model(text.clone()));
        self.busy = false;
        text
    }

    /// Records the hard fallback for a call that errored outright.
    pub fn fail_turn(&mut self) -> String {
        self.transcript.push(ChatMessage::model(CHAT_HARD_FALLBACK));
        self.busy = false;
        CHAT_HARD_FALLBACK.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestToken(u64);

/// Latest-request-wins holder for one UI flow's result. A stale response
/// (its token superseded by a later `begin`) is rejected instead of
/// overwriting newer state.
#[derive(Debug)]
pub struct FlowSlot<T> {
    counter: u64,
    pending: bool,
    value: Option<T>,
}

impl<T> Default for FlowSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FlowSlot<T> {
    pub fn new() -> Self {
        Self {
            counter: 0,
            pending: false,
            value: None,
        }
    }

    pub fn begin(&mut self) -> RequestToken {
        self.counter += 1;
        self.pending = true;
        RequestToken(self.counter)
    }

    pub fn accept(&mut self, token: RequestToken, value: T) -> bool {
        if token.0 != self.counter {
            return false;
        }
        self.value = Some(value);
        self.pending = false;
        true
    }

    pub fn clear(&mut self) {
        self.pending = false;
        self.value = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn request_timeout_seconds(options: &Map<String, Value>) -> f64 {
    options
        .get("request_timeout")
        .and_then(Value::as_f64)
        .unwrap_or(90.0)
        .clamp(15.0, 300.0)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
