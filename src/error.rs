use crate::error_code::StandardErrorCode;
use std::sync::Arc;
use thiserror::Error;

/// Structured error context for configuration and runtime failures.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Configuration key or request field that caused the error (e.g., "retry.max_delay_ms")
    pub field_path: Option<String>,
    pub details: Option<String>,
    /// Component that raised the error (e.g., "engine", "limiter")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A failure reported by a provider adapter.
///
/// Adapters fill in whatever they know: a provider error code, an HTTP status, or
/// only a message. The retry policy classifies from all three.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.describe())]
pub struct ProviderError {
    pub provider: String,
    pub code: Option<String>,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            code: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Standard classification, preferring the provider code over the HTTP status.
    pub fn standard_code(&self) -> StandardErrorCode {
        self.code
            .as_deref()
            .and_then(StandardErrorCode::from_provider_code)
            .or_else(|| self.status.map(StandardErrorCode::from_http_status))
            .unwrap_or(StandardErrorCode::Unknown)
    }

    fn describe(&self) -> String {
        let mut out = format!("{} error", self.provider);
        if let Some(status) = self.status {
            out.push_str(&format!(" (HTTP {})", status));
        }
        if let Some(ref code) = self.code {
            out.push_str(&format!(" [{}]", code));
        }
        out.push_str(": ");
        out.push_str(&self.message);
        out
    }
}

/// Unified error type for the execution engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Terminal failure of a request handle, shared by every waiter.
    #[error(transparent)]
    Failed(Arc<Error>),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            Error::Failed(inner) => inner.context(),
            _ => None,
        }
    }

    /// The provider failure behind this error, looking through shared handle failures.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Error::Provider(e) => Some(e),
            Error::Failed(inner) => inner.provider_error(),
            _ => None,
        }
    }

    pub fn is_configuration(&self) -> bool {
        match self {
            Error::Configuration { .. } => true,
            Error::Failed(inner) => inner.is_configuration(),
            _ => false,
        }
    }
}
