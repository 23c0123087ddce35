//! Human-readable classification of transport error events
//!
//! Reporting only. Recovery belongs to the transport's reconnect logic.

use crate::transport::{ErrorCode, RefusalCode, TransportFault};
use std::fmt;
use tracing::{error, info, warn};

/// Top-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    None,
    TcpTransport,
    ConnectionRefused,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::None => "none",
            ErrorCategory::TcpTransport => "tcp_transport",
            ErrorCategory::ConnectionRefused => "connection_refused",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified error ready for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub detail: String,
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.detail)
    }
}

/// Describe a CONNACK refusal reason
pub fn describe_refusal(code: RefusalCode) -> String {
    match code {
        RefusalCode::Accepted => "connection accepted".to_string(),
        RefusalCode::BadProtocolVersion => "refused: unacceptable protocol version".to_string(),
        RefusalCode::IdentifierRejected => "refused: client identifier rejected".to_string(),
        RefusalCode::ServerUnavailable => "refused: server unavailable".to_string(),
        RefusalCode::BadCredentials => "refused: bad username or password".to_string(),
        RefusalCode::NotAuthorized => "refused: not authorized".to_string(),
        RefusalCode::Other(raw) => format!("refused: unknown return code {raw}"),
    }
}

fn describe_fault(fault: &TransportFault) -> String {
    match fault.errno {
        Some(errno) => format!(
            "{} (errno {errno}: {})",
            fault.detail,
            std::io::Error::from_raw_os_error(errno)
        ),
        None => fault.detail.clone(),
    }
}

/// Translate a structured error code into a classification (pure function)
pub fn classify(code: &ErrorCode) -> ErrorClassification {
    match code {
        ErrorCode::None => ErrorClassification {
            category: ErrorCategory::None,
            detail: "no error".to_string(),
        },
        ErrorCode::Transport(fault) => ErrorClassification {
            category: ErrorCategory::TcpTransport,
            detail: describe_fault(fault),
        },
        ErrorCode::ConnectionRefused(refusal) => ErrorClassification {
            category: ErrorCategory::ConnectionRefused,
            detail: describe_refusal(*refusal),
        },
        ErrorCode::Unknown(raw) => ErrorClassification {
            category: ErrorCategory::Unknown,
            detail: format!("unrecognised error type {raw}"),
        },
    }
}

/// Classify and log an error event. Returns the classification for callers
/// that want to inspect it.
pub fn report(code: &ErrorCode) -> ErrorClassification {
    let classification = classify(code);
    match classification.category {
        ErrorCategory::None => info!(error_type = %classification.category, "MQTT error event without error"),
        ErrorCategory::TcpTransport => warn!(
            error_type = %classification.category,
            detail = %classification.detail,
            "MQTT transport error"
        ),
        ErrorCategory::ConnectionRefused => error!(
            error_type = %classification.category,
            detail = %classification.detail,
            "MQTT connection refused by broker"
        ),
        ErrorCategory::Unknown => warn!(
            error_type = %classification.category,
            detail = %classification.detail,
            "MQTT unknown error"
        ),
    }
    classification
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_none() {
        let classification = classify(&ErrorCode::None);
        assert_eq!(classification.category, ErrorCategory::None);
    }

    #[test]
    fn test_classify_transport_with_errno() {
        let code = ErrorCode::Transport(TransportFault {
            errno: Some(111),
            detail: "connect failed".to_string(),
        });
        let classification = classify(&code);
        assert_eq!(classification.category, ErrorCategory::TcpTransport);
        assert!(classification.detail.starts_with("connect failed (errno 111"));
    }

    #[test]
    fn test_classify_transport_without_errno() {
        let code = ErrorCode::Transport(TransportFault {
            errno: None,
            detail: "tls handshake failed".to_string(),
        });
        assert_eq!(classify(&code).detail, "tls handshake failed");
    }

    #[test]
    fn test_classify_refusals() {
        let cases = [
            (RefusalCode::BadProtocolVersion, "protocol version"),
            (RefusalCode::IdentifierRejected, "identifier rejected"),
            (RefusalCode::ServerUnavailable, "server unavailable"),
            (RefusalCode::BadCredentials, "bad username or password"),
            (RefusalCode::NotAuthorized, "not authorized"),
            (RefusalCode::Other(9), "unknown return code 9"),
        ];
        for (refusal, expected) in cases {
            let classification = classify(&ErrorCode::ConnectionRefused(refusal));
            assert_eq!(classification.category, ErrorCategory::ConnectionRefused);
            assert!(
                classification.detail.contains(expected),
                "{refusal:?} -> {}",
                classification.detail
            );
        }
    }

    #[test]
    fn test_classify_unknown() {
        let classification = classify(&ErrorCode::Unknown(77));
        assert_eq!(classification.category, ErrorCategory::Unknown);
        assert_eq!(classification.to_string(), "unknown: unrecognised error type 77");
    }

    #[test]
    fn test_report_returns_classification() {
        let code = ErrorCode::ConnectionRefused(RefusalCode::NotAuthorized);
        assert_eq!(report(&code), classify(&code));
    }
}
