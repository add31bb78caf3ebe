use thiserror::Error;

/// Result alias for core operations.
pub type CardsenseResult<T> = Result<T, CardsenseError>;

#[derive(Error, Debug)]
pub enum CardsenseError {
    #[error("[CS1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[CS1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[CS1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[CS1003] json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[CS1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[CS1200] card id `{0}` is not valid")]
    InvalidCardId(String),

    #[error("[CS2000] card controls error: {0}")]
    Controls(String),

    #[error("[CS2001] card controls timed out after {millis}ms: {operation}")]
    ControlsTimeout { operation: String, millis: u64 },

    #[error("[CS3000] card profile unavailable: {0}")]
    ProfileUnavailable(String),

    #[error("[CS3100] issuance session closed")]
    SessionClosed,
}

impl CardsenseError {
    pub fn code(&self) -> &'static str {
        match self {
            CardsenseError::Io(_) => "CS1000",
            CardsenseError::Toml(_) => "CS1001",
            CardsenseError::Yaml(_) => "CS1002",
            CardsenseError::Json(_) => "CS1003",
            CardsenseError::InvalidConfig(_) => "CS1100",
            CardsenseError::InvalidCardId(_) => "CS1200",
            CardsenseError::Controls(_) => "CS2000",
            CardsenseError::ControlsTimeout { .. } => "CS2001",
            CardsenseError::ProfileUnavailable(_) => "CS3000",
            CardsenseError::SessionClosed => "CS3100",
        }
    }
}
