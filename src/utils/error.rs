use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalystError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("{service} responded with HTTP {status}")]
    UpstreamStatusError { service: String, status: u16 },

    #[error("Ingestion failed in {ingestor}: {message}")]
    IngestionError { ingestor: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Export failed: {message}")]
    ExportError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: i64 },
}

pub type Result<T> = std::result::Result<T, AnalystError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Storage,
    Configuration,
    Validation,
    Processing,
    Export,
    NotFound,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnalystError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        AnalystError::ValidationError {
            message: message.into(),
        }
    }

    pub fn processing<S: Into<String>>(message: S) -> Self {
        AnalystError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        AnalystError::ConfigError {
            message: message.into(),
        }
    }

    pub fn ingestion<I: Into<String>, M: Into<String>>(ingestor: I, message: M) -> Self {
        AnalystError::IngestionError {
            ingestor: ingestor.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AnalystError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AnalystError::HttpError(_)
            | AnalystError::UpstreamStatusError { .. }
            | AnalystError::IngestionError { .. } => ErrorCategory::Network,
            AnalystError::DatabaseError(_) | AnalystError::IoError(_) => ErrorCategory::Storage,
            AnalystError::ConfigError { .. }
            | AnalystError::ConfigValidationError { .. }
            | AnalystError::InvalidConfigValueError { .. }
            | AnalystError::MissingConfigError { .. } => ErrorCategory::Configuration,
            AnalystError::ValidationError { .. } => ErrorCategory::Validation,
            AnalystError::SerializationError(_)
            | AnalystError::XmlError(_)
            | AnalystError::CsvError(_)
            | AnalystError::ProcessingError { .. } => ErrorCategory::Processing,
            AnalystError::ZipError(_) | AnalystError::ExportError { .. } => ErrorCategory::Export,
            AnalystError::NotFound { .. } => ErrorCategory::NotFound,
            AnalystError::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Cancelled => ErrorSeverity::Low,
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Validation
            | ErrorCategory::NotFound
            | ErrorCategory::Processing
            | ErrorCategory::Export => ErrorSeverity::High,
            ErrorCategory::Storage | ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// Transient failures worth another attempt: network errors, timeouts,
    /// 429 and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalystError::HttpError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error() || s.as_u16() == 429).unwrap_or(true)
            }
            AnalystError::UpstreamStatusError { status, .. } => *status >= 500 || *status == 429,
            AnalystError::IoError(_) => true,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check network connectivity and the configured data source URLs, then retry"
            }
            ErrorCategory::Storage => {
                "Check that the data directory exists and is writable, and that the database is not locked"
            }
            ErrorCategory::Configuration => "Review the configuration file and environment variables",
            ErrorCategory::Validation => "Correct the input (e.g. use a 1-5 letter ticker symbol) and try again",
            ErrorCategory::Processing => "The upstream data was malformed; retry later or try another source",
            ErrorCategory::Export => "Check that the exports directory is writable",
            ErrorCategory::NotFound => "Verify the identifier; list runs with the `runs` command",
            ErrorCategory::Cancelled => "Start a new analysis if results are still needed",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            AnalystError::HttpError(_) | AnalystError::UpstreamStatusError { .. } => {
                format!("Could not reach a data provider: {}", self)
            }
            AnalystError::DatabaseError(_) => format!("Local database problem: {}", self),
            AnalystError::NotFound { entity, id } => format!("No {} with id {}", entity, id),
            AnalystError::Cancelled { run_id } => format!("Analysis {} was cancelled", run_id),
            _ => self.to_string(),
        }
    }
}
