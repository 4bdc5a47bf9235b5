use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Agent rate limited: {0}")]
    AgentRateLimited(String),

    #[error("Workflow {workflow_id} failed at {step}: {message}")]
    Workflow {
        workflow_id: String,
        step: String,
        message: String,
    },

    #[error("State error: {0}")]
    State(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn workflow(workflow_id: impl Into<String>, step: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Workflow {
            workflow_id: workflow_id.into(),
            step: step.into(),
            message: message.into(),
        }
    }

    /// Stable name recorded in session error logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Config(_) => "config",
            AppError::Platform(_) => "platform",
            AppError::WebhookVerification(_) => "webhook_verification",
            AppError::Agent(_) | AppError::AgentRateLimited(_) => "agent",
            AppError::Workflow { .. } => "workflow",
            AppError::State(_) | AppError::Serialization(_) => "state",
            AppError::Git(_) | AppError::Workspace(_) => "git",
            AppError::Http(_) => "http",
            AppError::Io(_) => "io",
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        AppError::Platform(e.to_string())
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
