use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use astra_contracts::chat::{ChatMessage, Transcript};
use astra_contracts::events::{EventLog, EventPayload};
use astra_contracts::viz::{extract_artifact, TaskPatch, TaskPhase, VizStore};
use chrono::{SecondsFormat, Utc};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

pub const DEFAULT_VIZ_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_WEBHOOK_URL: &str =
    "https://healthrocket.app.n8n.cloud/webhook/8ec404be-7f51-47c8-8faf-0d139bd4c5e9/chat";

const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const RELAY_TIMEOUT_SECONDS: f64 = 23.0;

const MISSING_KEY_MESSAGE: &str =
    "Gemini API key not configured. Set GEMINI_API_KEY (or GOOGLE_API_KEY).";
const TIMEOUT_MESSAGE: &str = "Request timed out";
const TRUNCATED_MESSAGE: &str = "Response was truncated. Please try with a shorter message.";
const EMPTY_COMPLETION_TEXT: &str = "No visualization could be generated.";

pub const CHAT_FALLBACK_TEXT: &str =
    "I'm sorry, I'm having trouble connecting right now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl CompletionOptions {
    /// Settings used for every visualization request.
    pub fn visualization() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            top_k: 40,
            max_output_tokens: 16384,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Set when the provider reports the output was cut off by its token
    /// limit. Truncated pages are unusable, so this maps to a failure.
    pub truncated: bool,
}

pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion>;
}

#[derive(Default)]
pub struct TextProviderRegistry {
    providers: BTreeMap<String, Arc<dyn TextProvider>>,
}

impl TextProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: TextProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TextProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// The providers the CLI can choose from: the direct Gemini path, the
/// backend relay path when a relay URL is configured, and the offline
/// dryrun path.
pub fn default_text_providers(
    model: &str,
    relay_url: Option<&str>,
) -> Result<TextProviderRegistry> {
    let mut registry = TextProviderRegistry::new();
    registry.register(GeminiTextProvider::new(model)?);
    registry.register(DryrunTextProvider);
    let relay_url = relay_url
        .map(str::to_string)
        .or_else(|| non_empty_env("ASTRA_RELAY_URL"));
    if let Some(url) = relay_url {
        registry.register(RelayTextProvider::new(&url));
    }
    Ok(registry)
}

pub struct GeminiTextProvider {
    api_base: String,
    model: String,
    http: HttpClient,
}

impl GeminiTextProvider {
    pub fn new(model: &str) -> Result<Self> {
        // The direct path deliberately carries no deadline of its own;
        // the relay path owns the bounded-time behavior.
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed building Gemini HTTP client")?;
        Ok(Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            model: model.trim().to_string(),
            http,
        })
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl TextProvider for GeminiTextProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        let Some(api_key) = Self::api_key() else {
            bail!("{MISSING_KEY_MESSAGE}");
        };

        let endpoint = self.endpoint();
        let payload = json!({
            "contents": [{
                "parts": [{
                    "text": prompt,
                }],
            }],
            "generationConfig": {
                "temperature": options.temperature,
                "topK": options.top_k,
                "topP": options.top_p,
                "maxOutputTokens": options.max_output_tokens,
            },
        });

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Ok(parse_generate_content(&response_payload))
    }
}

/// Pull the completion out of a `generateContent` response body. A
/// missing candidate text is not an error: the fixed fallback sentence
/// flows through extraction verbatim and still renders.
fn parse_generate_content(payload: &Value) -> Completion {
    let candidate = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first());
    let truncated = candidate
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)
        .map(|reason| reason == "MAX_TOKENS")
        .unwrap_or(false);
    let text = candidate
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .unwrap_or(EMPTY_COMPLETION_TEXT)
        .to_string();
    Completion { text, truncated }
}

/// Proxy path through the backend relay. The relay owns the 23 second
/// upper bound; an exceeded bound surfaces as the distinct timeout
/// reason, everything else as an ordinary transport failure.
pub struct RelayTextProvider {
    endpoint: String,
    http: HttpClient,
}

impl RelayTextProvider {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        }
    }
}

impl TextProvider for RelayTextProvider {
    fn name(&self) -> &str {
        "relay"
    }

    fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<Completion> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .timeout(Duration::from_secs_f64(RELAY_TIMEOUT_SECONDS))
            .json(&json!({ "messageText": prompt }));
        // Development-proxy key path: forward a local key so the relay
        // can authenticate when its own environment has none.
        if let Some(api_key) = non_empty_env("GEMINI_API_KEY") {
            request = request.header("x-gemini-api-key", api_key);
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(err) if err.is_timeout() => bail!("{TIMEOUT_MESSAGE}"),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("relay request failed ({})", self.endpoint)))
            }
        };

        let status = response.status();
        let body = response.text().context("relay response body read failed")?;
        let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        if !status.is_success() {
            let reason = payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "relay request failed ({}): {}",
                        status.as_u16(),
                        truncate_text(&body, 512)
                    )
                });
            bail!("{reason}");
        }

        let Some(content) = payload.get("content").and_then(Value::as_str) else {
            bail!("relay returned no content");
        };
        Ok(Completion {
            text: content.to_string(),
            truncated: false,
        })
    }
}

/// Offline provider: answers every prompt with a deterministic
/// self-contained page wrapped in a fenced block, so the whole pipeline
/// (including extraction) runs without network access or keys.
pub struct DryrunTextProvider;

impl TextProvider for DryrunTextProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<Completion> {
        let excerpt = escape_html(&truncate_text(prompt, 200));
        let text = format!(
            "Here is the visualization.\n```html\n<!DOCTYPE html>\n<html>\n<head>\n<style>\nbody {{ background: #111827; color: #d1d5db; font-family: -apple-system, BlinkMacSystemFont, sans-serif; padding: 24px; }}\nh1 {{ color: #93c5fd; }}\n</style>\n</head>\n<body>\n<h1>Dryrun visualization</h1>\n<p>{excerpt}</p>\n<script>document.title = 'Dryrun visualization';</script>\n</body>\n</html>\n```\n"
        );
        Ok(Completion {
            text,
            truncated: false,
        })
    }
}

/// The fixed style/constraint preamble plus the message text. Kept
/// deterministic: the same source text always produces the same prompt.
pub fn build_visualization_prompt(source_text: &str) -> String {
    format!(
        "You are a data visualization expert. Create a complete, working HTML page with inline CSS and JavaScript that visualizes the following data.

From the text here, please create a brief yet comprehensive graphic visualization that helps me understand this information better. Use this color scheme:
Color Scheme:
- Primary background: #111827 (gray-900)
- Secondary background: #374151 (gray-700) to #1f2937 (gray-800) gradients
- Accent colors: #2563eb (blue-600) to #7c3aed (purple-600) gradients
- Text colors: #ffffff (white), #d1d5db (gray-300), #93c5fd (blue-300)
- Success/positive: #10b981 (emerald-500)
- Warning: #f59e0b (amber-500)
- Error: #ef4444 (red-500)

CRITICAL REQUIREMENTS:
1. Create a complete HTML page with <!DOCTYPE html>, <html>, <head>, and <body> tags
2. Include ALL CSS inline in <style> tags within the <head>
3. Include ALL JavaScript inline in <script> tags at the end of the <body>
4. Do NOT use any external libraries, CDN links, or external resources
5. Use the specified color scheme to match the app's dark theme
6. Make it responsive and mobile-friendly
7. Add smooth animations and transitions where appropriate
8. Include interactive elements if the data supports it (charts, graphs, etc.)
9. Ensure all JavaScript executes properly when the page loads
10. Use actual data from the message to populate charts and visualizations

Make it visually appealing and functional:

{source_text}

The output should be a complete, self-contained HTML file that renders properly with all JavaScript functionality working."
    )
}

pub trait ChatTransport: Send + Sync {
    fn send(&self, text: &str) -> Result<String>;
}

/// Webhook-backed chat transport.
pub struct ChatClient {
    url: String,
    http: HttpClient,
}

impl ChatClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim().to_string(),
            http: HttpClient::new(),
        }
    }
}

impl ChatTransport for ChatClient {
    fn send(&self, text: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "chatInput": text }))
            .send()
            .with_context(|| format!("chat webhook request failed ({})", self.url))?;
        let status = response.status();
        let body = response
            .text()
            .context("chat webhook response body read failed")?;
        if !status.is_success() {
            bail!(
                "chat webhook request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        Ok(parse_chat_reply(&body))
    }
}

/// Webhook replies are usually JSON objects carrying an `output` field;
/// anything else is used as-is.
fn parse_chat_reply(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload
                .get("output")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Conversation session: transcript plus the chat transport. Transport
/// failures never escape; the session substitutes the fixed apology
/// reply, since the chat path has no per-message task state to fail
/// into.
pub struct ChatSession {
    transcript: Transcript,
    transport: Box<dyn ChatTransport>,
    events: EventLog,
}

impl ChatSession {
    pub fn new(transport: Box<dyn ChatTransport>, events: EventLog) -> Self {
        Self {
            transcript: Transcript::with_welcome(),
            transport,
            events,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn send_message(&mut self, text: &str) -> Option<&ChatMessage> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let user = self.transcript.push_user(trimmed);
        let _ = self.events.emit(
            "chat_message_sent",
            json_object(json!({ "message": message_value(user) })),
        );

        match self.transport.send(trimmed) {
            Ok(reply) => {
                let message = self.transcript.push_assistant(&reply);
                let _ = self.events.emit(
                    "chat_reply_received",
                    json_object(json!({ "message": message_value(message) })),
                );
            }
            Err(err) => {
                let _ = self.events.emit(
                    "chat_send_failed",
                    json_object(json!({ "reason": error_chain_text(&err, 512) })),
                );
                self.transcript.push_assistant(CHAT_FALLBACK_TEXT);
            }
        }
        self.transcript.messages().last()
    }
}

struct VizOutcome {
    message_id: String,
    request_seq: u64,
    result: Result<Completion>,
}

/// Drives the lifecycle of visualization requests. State transitions
/// happen only on the thread that owns the store: `generate` applies the
/// synchronous generating transition and hands the network call to a
/// worker; `pump`/`wait_for` apply worker outcomes as they arrive.
pub struct VizOrchestrator {
    provider: Arc<dyn TextProvider>,
    events: EventLog,
    outcome_tx: Sender<VizOutcome>,
    outcome_rx: Receiver<VizOutcome>,
}

impl VizOrchestrator {
    pub fn new(provider: Arc<dyn TextProvider>, events: EventLog) -> Self {
        let (outcome_tx, outcome_rx) = channel();
        Self {
            provider,
            events,
            outcome_tx,
            outcome_rx,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Swap the provider for subsequent requests. Outstanding workers
    /// keep the provider they were spawned with.
    pub fn set_provider(&mut self, provider: Arc<dyn TextProvider>) {
        self.provider = provider;
    }

    /// Start (or restart) a visualization for `message_id`. Selection and
    /// the generating state are applied before the worker exists, so the
    /// caller can render progress immediately. Never fails: every
    /// eventual outcome, including errors, lands in the store.
    pub fn generate(&self, store: &mut VizStore, message_id: &str, source_text: &str) {
        let request_seq = store.begin_request(message_id);
        let _ = self.events.emit(
            "viz_requested",
            json_object(json!({
                "message_id": message_id,
                "request_seq": request_seq,
                "provider": self.provider.name(),
                "source_chars": source_text.chars().count(),
            })),
        );

        let provider = Arc::clone(&self.provider);
        let outcome_tx = self.outcome_tx.clone();
        let prompt = build_visualization_prompt(source_text);
        let message_id = message_id.to_string();
        thread::spawn(move || {
            let result = provider.complete(&prompt, &CompletionOptions::visualization());
            let _ = outcome_tx.send(VizOutcome {
                message_id,
                request_seq,
                result,
            });
        });
    }

    /// Apply every outcome that has already arrived. Returns the
    /// non-stale resolutions so the caller can announce them.
    pub fn pump(&self, store: &mut VizStore) -> Vec<(String, TaskPhase)> {
        let mut resolved = Vec::new();
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            if let Some(applied) = self.apply(store, outcome) {
                resolved.push(applied);
            }
        }
        resolved
    }

    /// Block until the task for `message_id` leaves the generating phase
    /// or the timeout elapses. Outcomes for other tasks arriving in the
    /// meantime are applied too.
    pub fn wait_for(&self, store: &mut VizStore, message_id: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if store
                .get(message_id)
                .map(|task| task.phase != TaskPhase::Generating)
                .unwrap_or(false)
            {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.outcome_rx.recv_timeout(remaining) {
                Ok(outcome) => {
                    self.apply(store, outcome);
                }
                Err(_) => return false,
            }
        }
    }

    fn apply(&self, store: &mut VizStore, outcome: VizOutcome) -> Option<(String, TaskPhase)> {
        // A newer request for this id has been issued since this worker
        // started; its result must not overwrite the newer state.
        if store.request_seq(&outcome.message_id) != Some(outcome.request_seq) {
            let _ = self.events.emit(
                "viz_stale_discarded",
                json_object(json!({
                    "message_id": outcome.message_id,
                    "request_seq": outcome.request_seq,
                })),
            );
            return None;
        }

        let message_id = outcome.message_id;
        match outcome.result {
            Ok(completion) if completion.truncated => {
                store.upsert(&message_id, TaskPatch::failed(error_fragment(TRUNCATED_MESSAGE)));
                let _ = self.events.emit(
                    "viz_failed",
                    json_object(json!({
                        "message_id": message_id,
                        "reason": TRUNCATED_MESSAGE,
                    })),
                );
                Some((message_id, TaskPhase::Failed))
            }
            Ok(completion) => {
                let extracted = extract_artifact(&completion.text);
                let _ = self.events.emit(
                    "viz_ready",
                    json_object(json!({
                        "message_id": message_id,
                        "artifact_source": extracted.source.as_str(),
                        "artifact_chars": extracted.text.chars().count(),
                    })),
                );
                store.upsert(&message_id, TaskPatch::ready(extracted.text));
                Some((message_id, TaskPhase::Ready))
            }
            Err(err) => {
                let reason = error_chain_text(&err, 512);
                store.upsert(&message_id, TaskPatch::failed(error_fragment(&reason)));
                let _ = self.events.emit(
                    "viz_failed",
                    json_object(json!({
                        "message_id": message_id,
                        "reason": reason,
                    })),
                );
                Some((message_id, TaskPhase::Failed))
            }
        }
    }
}

/// Error fragments render in the same document viewport as successful
/// artifacts, styled like the rest of the dark theme.
pub fn error_fragment(message: &str) -> String {
    format!(
        "<div style=\"padding: 20px; text-align: center; color: #ef4444; background: #111827; font-family: -apple-system, BlinkMacSystemFont, sans-serif;\">{}</div>",
        escape_html(message)
    )
}

/// Write the wrapper page hosting an artifact inside a sandboxed iframe.
/// The sandbox permits scripts but denies navigation and embedding
/// effects outside the frame, which is the isolation contract the
/// artifact is rendered under.
pub fn write_document_page(dir: &Path, message_id: &str, artifact: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed creating {}", dir.display()))?;
    let path = dir.join(format!("visualization-{message_id}.html"));
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false);
    let page = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\n<title>Data Visualization</title>\n<!-- generated {generated_at} -->\n<style>\nhtml, body {{ margin: 0; height: 100%; background: #111827; }}\niframe {{ width: 100%; height: 100%; border: 0; }}\n</style>\n</head>\n<body>\n<iframe title=\"Data Visualization\" sandbox=\"allow-scripts\" srcdoc=\"{}\"></iframe>\n</body>\n</html>\n",
        escape_attribute(artifact)
    );
    fs::write(&path, page).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
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

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
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

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_html(value).replace('"', "&quot;")
}

fn message_value(message: &ChatMessage) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

pub fn json_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
