use thiserror::Error;

/// Patterns (lowercase) that must never reach a notification.
const SENSITIVE_PATTERNS: &[&str] = &["bearer ", "authorization:", "token="];

fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Every failure the ingestion coordinator can observe.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Local ────────────────────────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("A batch is already in progress")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Submission ───────────────────────────────────────────────────────────
    #[error("Server returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<IngestError>,
    },

    // ── Progress channel ─────────────────────────────────────────────────────
    #[error("Progress channel error: {0}")]
    Channel(String),
}

impl IngestError {
    /// Network and timeout class failures, plus HTTP 408/429/5xx, are worth
    /// another attempt. Everything else aborts the retry loop immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Connection(_) | IngestError::Timeout => true,
            IngestError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Message suitable for the notification surface.
    pub fn user_message(&self) -> String {
        let message = match self {
            IngestError::Validation(msg) => msg.clone(),
            IngestError::Busy => {
                "Wait for the current batch to finish before uploading more files.".to_string()
            }
            IngestError::Config(msg) => format!("Configuration problem: {}", msg),
            IngestError::Io(e) => format!("Could not read file: {}", e),
            IngestError::Http { status, message } if message.is_empty() => {
                format!("The server rejected the request (HTTP {}).", status)
            }
            IngestError::Http { status, message } => {
                format!("The server rejected the request (HTTP {}): {}", status, message)
            }
            IngestError::Connection(_) => {
                "Could not reach the server. Check your connection.".to_string()
            }
            IngestError::Timeout => "The server took too long to respond.".to_string(),
            IngestError::InvalidResponse(_) => "The server sent an unexpected response.".to_string(),
            IngestError::RetriesExhausted { attempts, last } => {
                format!("{} (after {} attempts)", last.user_message(), attempts)
            }
            IngestError::Channel(_) => "Lost connection to processing updates.".to_string(),
        };

        if contains_sensitive(&message) {
            "Something went wrong. Please try again.".to_string()
        } else {
            message
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            IngestError::Timeout
        } else if e.is_decode() {
            IngestError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            IngestError::Http {
                status: status.as_u16(),
                message: String::new(),
            }
        } else {
            IngestError::Connection(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_class_errors_are_retryable() {
        assert!(IngestError::Connection("reset".into()).is_retryable());
        assert!(IngestError::Timeout.is_retryable());
        for status in [408, 429, 500, 502, 503] {
            let err = IngestError::Http {
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "HTTP {} should be retryable", status);
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400, 401, 403, 404, 413, 422] {
            let err = IngestError::Http {
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "HTTP {} should not be retryable", status);
        }
        assert!(!IngestError::Validation("bad".into()).is_retryable());
        assert!(!IngestError::InvalidResponse("garbage".into()).is_retryable());
        let exhausted = IngestError::RetriesExhausted {
            attempts: 3,
            last: Box::new(IngestError::Timeout),
        };
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn user_message_hides_sensitive_server_text() {
        let err = IngestError::Http {
            status: 401,
            message: "Authorization: Bearer abc123 is invalid".into(),
        };
        let message = err.user_message().to_ascii_lowercase();
        assert!(!message.contains("bearer"));
        assert!(!message.contains("abc123"));
    }

    #[test]
    fn exhausted_message_mentions_attempts() {
        let err = IngestError::RetriesExhausted {
            attempts: 3,
            last: Box::new(IngestError::Timeout),
        };
        assert!(err.user_message().contains("3 attempts"));
    }
}
