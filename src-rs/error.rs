use thiserror::Error;

#[derive(Error, Debug)]
pub enum PilotError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("malformed action: {0}")]
    MalformedAction(String),
    #[error("remote session error: {0}")]
    RemoteSession(String),
    #[error("planning service error: {0}")]
    PlanningService(String),
    #[error("planning quota exceeded: {0}")]
    PlanningQuotaExceeded(String),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("planning request cancelled")]
    Cancelled,
}

impl PilotError {
    /// Stable identifier carried by terminal error notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            PilotError::Configuration(_) => "configuration",
            PilotError::UnsupportedAction(_) => "unsupported_action",
            PilotError::MalformedAction(_) => "malformed_action",
            PilotError::RemoteSession(_) => "remote_session",
            PilotError::PlanningService(_) => "planning_service",
            PilotError::PlanningQuotaExceeded(_) => "planning_quota_exceeded",
            PilotError::Image(_) => "image",
            PilotError::Cancelled => "cancelled",
        }
    }

    /// Message suitable for showing to the person who started the run.
    pub fn user_message(&self) -> String {
        match self {
            PilotError::PlanningQuotaExceeded(_) => {
                "The planning service quota has been exceeded. Please try again later.".to_string()
            }
            PilotError::PlanningService(detail) => {
                format!("The planning service failed to respond: {detail}")
            }
            other => other.to_string(),
        }
    }
}

pub type PilotResult<T> = std::result::Result<T, PilotError>;
