//! Observe -> act -> re-observe loop.
//!
//! Exactly one action runs per planner round trip and every action is followed
//! by a fresh screenshot before the next one is planned. Cancellation is polled
//! at the top of each planning step only; an executing or capturing step always
//! runs to completion.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::cancel::{CancelToken, StopReason};
use crate::desktop::RemoteDesktop;
use crate::error::PilotError;
use crate::events::{EventSink, LoopEvent};
use crate::executor::ActionExecutor;
use crate::planner::{ComputerCall, PlanRequest, PlanResponse, Planner, SafetyCheck, Turn};
use crate::scaling::Scaler;
use crate::screenshot::ScreenshotTranscoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Planning,
    Executing,
    Capturing,
    Done,
    Cancelled,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub steps: u32,
    pub message: Option<String>,
    pub error_kind: Option<String>,
}

/// Transcript plus continuation token, owned by one loop run.
#[derive(Debug, Default)]
pub struct Conversation {
    transcript: Vec<Turn>,
    sent: usize,
    continuation: Option<String>,
}

impl Conversation {
    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    fn push(&mut self, turn: Turn) {
        self.transcript.push(turn);
    }

    /// With a continuation only unseen turns go out; otherwise the full history.
    fn pending(&self) -> &[Turn] {
        match self.continuation {
            Some(_) => &self.transcript[self.sent..],
            None => &self.transcript,
        }
    }

    fn record_response(&mut self, response: &PlanResponse, chosen: Option<&ComputerCall>) {
        if let Some(text) = &response.text {
            self.push(Turn::Assistant { text: text.clone() });
        }
        if let Some(call) = chosen {
            self.push(Turn::Call {
                item_id: call.item_id.clone(),
                call_id: call.call_id.clone(),
                action: call.action.clone(),
            });
        }
        self.continuation = response.response_id.clone();
        self.sent = self.transcript.len();
        if self.continuation.is_some() {
            self.forget_sent_images();
        }
    }

    /// Frames the planner already holds behind the continuation are never resent.
    fn forget_sent_images(&mut self) {
        for turn in &mut self.transcript[..self.sent] {
            match turn {
                Turn::User { image, .. } => *image = None,
                Turn::ActionResult { image, .. } => image.clear(),
                Turn::Assistant { .. } | Turn::Call { .. } => {}
            }
        }
    }
}

enum Step {
    Planning,
    Executing {
        call: ComputerCall,
        reasoning: Option<String>,
    },
    Capturing {
        call_id: String,
        acknowledged: Vec<SafetyCheck>,
    },
    Finished(LoopOutcome),
}

impl Step {
    fn state(&self) -> LoopState {
        match self {
            Step::Planning => LoopState::Planning,
            Step::Executing { .. } => LoopState::Executing,
            Step::Capturing { .. } => LoopState::Capturing,
            Step::Finished(outcome) => outcome.state,
        }
    }
}

pub struct ActionLoop<'a> {
    desktop: &'a mut dyn RemoteDesktop,
    planner: &'a mut dyn Planner,
    executor: ActionExecutor,
    transcoder: ScreenshotTranscoder,
    acknowledge_safety_checks: bool,
}

impl<'a> ActionLoop<'a> {
    pub fn new(desktop: &'a mut dyn RemoteDesktop, planner: &'a mut dyn Planner, scaler: Scaler) -> Self {
        Self {
            desktop,
            planner,
            transcoder: ScreenshotTranscoder::new(&scaler),
            executor: ActionExecutor::new(scaler),
            acknowledge_safety_checks: true,
        }
    }

    pub fn acknowledge_safety_checks(mut self, acknowledge: bool) -> Self {
        self.acknowledge_safety_checks = acknowledge;
        self
    }

    /// Drives the loop to a terminal state. Exactly one terminal event is emitted.
    pub fn run(&mut self, task: &str, sink: &mut dyn EventSink, cancel: &CancelToken) -> LoopOutcome {
        let mut conversation = Conversation::default();
        let mut steps: u32 = 0;
        let mut last_frame: Option<String> = None;
        let mut step = Step::Planning;

        info!(session = %self.desktop.session_id(), "starting action loop");

        loop {
            debug!(state = ?step.state(), steps, "loop transition");
            step = match step {
                Step::Planning => {
                    self.plan(task, &mut conversation, &mut last_frame, steps, sink, cancel)
                }
                Step::Executing { call, reasoning } => {
                    self.execute(call, reasoning, &mut steps, sink)
                }
                Step::Capturing {
                    call_id,
                    acknowledged,
                } => {
                    match self.transcoder.capture(&mut *self.desktop) {
                        Ok(frame) => last_frame = Some(frame.data_url()),
                        Err(err) => warn!(
                            error = %err,
                            call_id = %call_id,
                            "post-action screenshot failed; reusing previous frame"
                        ),
                    }
                    conversation.push(Turn::ActionResult {
                        call_id,
                        image: last_frame.clone().unwrap_or_default(),
                        acknowledged,
                    });
                    Step::Planning
                }
                Step::Finished(outcome) => {
                    info!(state = ?outcome.state, steps = outcome.steps, "action loop finished");
                    return outcome;
                }
            };
        }
    }

    fn plan(
        &mut self,
        task: &str,
        conversation: &mut Conversation,
        last_frame: &mut Option<String>,
        steps: u32,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> Step {
        if let Some(reason) = cancel.reason() {
            return stopped(reason, steps, sink);
        }

        if conversation.is_empty() {
            let frame = match self.transcoder.capture(&mut *self.desktop) {
                Ok(frame) => frame.data_url(),
                Err(err) => return errored(&err, steps, sink),
            };
            *last_frame = Some(frame.clone());
            conversation.push(Turn::User {
                text: task.to_string(),
                image: Some(frame),
            });
        }

        let request = PlanRequest {
            turns: conversation.pending(),
            previous_response_id: conversation.continuation(),
            display: self.transcoder.target(),
        };
        let response = match self.planner.plan(&request, cancel) {
            Ok(response) => response,
            Err(PilotError::Cancelled) => {
                return stopped(cancel.reason().unwrap_or(StopReason::User), steps, sink)
            }
            Err(err) => return errored(&err, steps, sink),
        };

        if response.calls.len() > 1 {
            warn!(
                proposed = response.calls.len(),
                "planner proposed several actions; executing only the first"
            );
        }
        let chosen = response.calls.first().cloned();
        conversation.record_response(&response, chosen.as_ref());

        match chosen {
            Some(call) => Step::Executing {
                call,
                reasoning: join_explanations(response.reasoning, response.text),
            },
            None => {
                let message = response.text.or(response.reasoning);
                sink.emit(LoopEvent::Done {
                    steps,
                    message: message.clone(),
                });
                Step::Finished(LoopOutcome {
                    state: LoopState::Done,
                    steps,
                    message,
                    error_kind: None,
                })
            }
        }
    }

    fn execute(
        &mut self,
        call: ComputerCall,
        reasoning: Option<String>,
        steps: &mut u32,
        sink: &mut dyn EventSink,
    ) -> Step {
        if let Some(text) = reasoning {
            sink.emit(LoopEvent::Reasoning { text });
        }

        let action = match Action::from_value(&call.action) {
            Ok(action) => action,
            Err(err) => return errored(&err, *steps, sink),
        };
        let step_no = *steps + 1;

        if !call.pending_safety_checks.is_empty() {
            if !self.acknowledge_safety_checks {
                let message = format!(
                    "action {} requires human confirmation: {}",
                    action.describe(),
                    call.pending_safety_checks
                        .iter()
                        .filter_map(|c| c.message.as_deref().or(c.code.as_deref()))
                        .collect::<Vec<_>>()
                        .join("; ")
                );
                sink.emit(LoopEvent::Error {
                    steps: *steps,
                    kind: "confirmation_required".to_string(),
                    message: message.clone(),
                });
                return Step::Finished(LoopOutcome {
                    state: LoopState::Errored,
                    steps: *steps,
                    message: Some(message),
                    error_kind: Some("confirmation_required".to_string()),
                });
            }
            for check in &call.pending_safety_checks {
                sink.emit(LoopEvent::SafetyCheck {
                    step: step_no,
                    call_id: call.call_id.clone(),
                    code: check.code.clone(),
                    message: check.message.clone(),
                });
            }
        }

        sink.emit(LoopEvent::Action {
            step: step_no,
            call_id: call.call_id.clone(),
            kind: action.kind().to_string(),
            description: action.describe(),
            action: call.action.clone(),
        });
        if let Err(err) = self.executor.execute(&action, &mut *self.desktop) {
            return errored(&err, *steps, sink);
        }
        *steps = step_no;
        sink.emit(LoopEvent::ActionCompleted {
            step: step_no,
            call_id: call.call_id.clone(),
        });

        Step::Capturing {
            call_id: call.call_id,
            acknowledged: call.pending_safety_checks,
        }
    }
}

fn join_explanations(reasoning: Option<String>, text: Option<String>) -> Option<String> {
    match (reasoning, text) {
        (Some(reasoning), Some(text)) => Some(format!("{reasoning}\n{text}")),
        (reasoning, text) => reasoning.or(text),
    }
}

fn stopped(reason: StopReason, steps: u32, sink: &mut dyn EventSink) -> Step {
    let message = match reason {
        StopReason::User => "stopped by user",
        StopReason::Timeout => "stopped: automation timed out",
    }
    .to_string();
    sink.emit(LoopEvent::Stopped {
        steps,
        reason,
        message: message.clone(),
    });
    Step::Finished(LoopOutcome {
        state: LoopState::Cancelled,
        steps,
        message: Some(message),
        error_kind: None,
    })
}

fn errored(err: &PilotError, steps: u32, sink: &mut dyn EventSink) -> Step {
    warn!(error = %err, kind = err.kind(), "action loop failed");
    let message = err.user_message();
    sink.emit(LoopEvent::Error {
        steps,
        kind: err.kind().to_string(),
        message: message.clone(),
    });
    Step::Finished(LoopOutcome {
        state: LoopState::Errored,
        steps,
        message: Some(message),
        error_kind: Some(err.kind().to_string()),
    })
}
