use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    General(String),

    #[error("Enumeration failed: {0}")]
    Enumeration(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid stage transition: {0}")]
    InvalidTransition(String),
}

impl AppError {
    pub fn capture(self) -> Self {
        tracing::error!(kind = self.kind(), "{self}");
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
            Self::Http(_) => "http",
            Self::Config(_) => "config",
            Self::General(_) => "general",
            Self::Enumeration(_) => "enumeration",
            Self::Classification(_) => "classification",
            Self::TaskNotFound(_) => "task_not_found",
            Self::InvalidTransition(_) => "invalid_transition",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
