//! Planning capability: a vision-language model that looks at the screen and
//! proposes the next action.
//!
//! [`ResponsesPlanner`] speaks the OpenAI Responses API computer-use tool.
//! `previous_response_id` is the continuation token, so after the first turn
//! only new turns are sent.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::PlannerConfig;
use crate::error::{PilotError, PilotResult};
use crate::scaling::Resolution;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User {
        text: String,
        /// PNG data URL; only attached to the opening turn.
        image: Option<String>,
    },
    Assistant {
        text: String,
    },
    Call {
        item_id: Option<String>,
        call_id: String,
        action: Value,
    },
    ActionResult {
        call_id: String,
        image: String,
        acknowledged: Vec<SafetyCheck>,
    },
}

#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    /// Turns the planner has not seen yet (all of them without a continuation).
    pub turns: &'a [Turn],
    pub previous_response_id: Option<&'a str>,
    pub display: Resolution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputerCall {
    pub item_id: Option<String>,
    pub call_id: String,
    /// Raw action payload in model space.
    pub action: Value,
    pub pending_safety_checks: Vec<SafetyCheck>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanResponse {
    pub response_id: Option<String>,
    pub reasoning: Option<String>,
    pub text: Option<String>,
    pub calls: Vec<ComputerCall>,
}

pub trait Planner {
    /// Must return [`PilotError::Cancelled`] promptly once `cancel` fires.
    fn plan(&mut self, request: &PlanRequest<'_>, cancel: &CancelToken) -> PilotResult<PlanResponse>;
}

pub struct ResponsesPlanner {
    client: HttpClient,
    config: PlannerConfig,
    api_key: String,
}

impl ResponsesPlanner {
    pub fn new(config: PlannerConfig) -> PilotResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PilotError::Configuration("planner API key is not set".to_string()))?;
        let client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| PilotError::Configuration(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }

    pub fn build_body(&self, request: &PlanRequest<'_>) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.config.model));
        body.insert(
            "tools".to_string(),
            json!([{
                "type": "computer_use_preview",
                "display_width": request.display.width,
                "display_height": request.display.height,
                "environment": self.config.environment,
            }]),
        );
        body.insert(
            "input".to_string(),
            Value::Array(request.turns.iter().map(turn_to_input).collect()),
        );
        body.insert("truncation".to_string(), json!("auto"));
        body.insert("reasoning".to_string(), json!({"summary": "concise"}));
        if let Some(id) = request.previous_response_id {
            body.insert("previous_response_id".to_string(), json!(id));
        }
        if let Some(instructions) = &self.config.instructions {
            body.insert("instructions".to_string(), json!(instructions));
        }
        Value::Object(body)
    }
}

impl Planner for ResponsesPlanner {
    fn plan(&mut self, request: &PlanRequest<'_>, cancel: &CancelToken) -> PilotResult<PlanResponse> {
        if cancel.is_cancelled() {
            return Err(PilotError::Cancelled);
        }

        let body = self.build_body(request);
        let url = self.endpoint();
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        info!(
            url = %url,
            turns = request.turns.len(),
            continued = request.previous_response_id.is_some(),
            "requesting next action"
        );

        // The request runs on a worker so an in-flight call can be abandoned.
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = client
                .post(&url)
                .bearer_auth(api_key)
                .header(CONTENT_TYPE, "application/json")
                .json(&body)
                .send()
                .and_then(|resp| {
                    let status = resp.status();
                    resp.text().map(|text| (status, text))
                });
            let _ = tx.send(result);
        });

        let poll = self.config.poll_interval();
        let (status, text) = loop {
            match rx.recv_timeout(poll) {
                Ok(Ok(reply)) => break reply,
                Ok(Err(err)) => {
                    return Err(PilotError::PlanningService(format!("request failed: {err}")))
                }
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        info!("abandoning in-flight planning request");
                        return Err(PilotError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PilotError::PlanningService(
                        "planning worker exited without a reply".to_string(),
                    ))
                }
            }
        };

        debug!(status = %status, body = %truncate_text(&text, 500), "planner reply");
        parse_response(status, &text)
    }
}

fn turn_to_input(turn: &Turn) -> Value {
    match turn {
        Turn::User { text, image } => {
            let mut content = vec![json!({"type": "input_text", "text": text})];
            if let Some(url) = image {
                content.push(json!({"type": "input_image", "image_url": url}));
            }
            json!({"role": "user", "content": content})
        }
        Turn::Assistant { text } => json!({"role": "assistant", "content": text}),
        Turn::Call {
            item_id,
            call_id,
            action,
        } => {
            let mut item = json!({
                "type": "computer_call",
                "call_id": call_id,
                "action": action,
                "pending_safety_checks": [],
                "status": "completed",
            });
            if let (Some(id), Value::Object(map)) = (item_id, &mut item) {
                map.insert("id".to_string(), json!(id));
            }
            item
        }
        Turn::ActionResult {
            call_id,
            image,
            acknowledged,
        } => json!({
            "type": "computer_call_output",
            "call_id": call_id,
            "acknowledged_safety_checks": acknowledged,
            "output": {"type": "computer_screenshot", "image_url": image},
        }),
    }
}

pub fn parse_response(status: StatusCode, text: &str) -> PilotResult<PlanResponse> {
    let payload: Value = serde_json::from_str(text).unwrap_or(Value::Null);

    if !status.is_success() {
        let error = payload.get("error");
        let code = error
            .and_then(|e| e.get("code").or_else(|| e.get("type")))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let message = error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| truncate_text(text, 300));
        warn!(status = %status, code, "planning service error");
        if status == StatusCode::TOO_MANY_REQUESTS
            || matches!(code, "insufficient_quota" | "rate_limit_exceeded")
        {
            return Err(PilotError::PlanningQuotaExceeded(message));
        }
        return Err(PilotError::PlanningService(format!("HTTP {status}: {message}")));
    }

    if payload.is_null() {
        return Err(PilotError::PlanningService(
            "planner reply is not valid JSON".to_string(),
        ));
    }
    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(PilotError::PlanningService(message.to_string()));
    }

    let mut response = PlanResponse {
        response_id: payload.get("id").and_then(Value::as_str).map(str::to_string),
        ..PlanResponse::default()
    };
    let mut reasoning = Vec::new();
    let mut texts = Vec::new();

    for item in payload
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match item.get("type").and_then(Value::as_str) {
            Some("reasoning") => reasoning.extend(collect_text(item.get("summary"))),
            Some("message") => texts.extend(collect_text(item.get("content"))),
            Some("computer_call") => {
                let Some(call_id) = item.get("call_id").and_then(Value::as_str) else {
                    warn!("computer call without call_id; skipping");
                    continue;
                };
                let pending_safety_checks = item
                    .get("pending_safety_checks")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .map(serde_json::from_value::<Vec<SafetyCheck>>)
                    .transpose()
                    .map_err(|err| {
                        PilotError::PlanningService(format!("invalid safety checks: {err}"))
                    })?
                    .unwrap_or_default();
                response.calls.push(ComputerCall {
                    item_id: item.get("id").and_then(Value::as_str).map(str::to_string),
                    call_id: call_id.to_string(),
                    action: item.get("action").cloned().unwrap_or(Value::Null),
                    pending_safety_checks,
                });
            }
            other => debug!(item_type = ?other, "ignoring planner output item"),
        }
    }

    response.reasoning = join_nonempty(reasoning);
    response.text = join_nonempty(texts);
    Ok(response)
}

fn collect_text(parts: Option<&Value>) -> Vec<String> {
    parts
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_nonempty(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "...<truncated>"
}
