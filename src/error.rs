//! Error types for the snapshot gateway

use http::StatusCode;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error types that can occur while serving a snapshot
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Method {method} not allowed")]
    MethodNotAllowed { method: String },

    #[error("Snapshot '{id}' not found")]
    SnapshotNotFound { id: String },

    #[error("Metadata store error: {0}")]
    MetadataStore(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Origin answered {status} while requesting range 0-{range_end}")]
    OriginStatus { status: StatusCode, range_end: u64 },

    #[error("Origin contract violation: {0}")]
    OriginContract(String),

    #[error("Origin request failed: {0}")]
    OriginRequest(String),

    #[error("Origin did not answer within {seconds}s")]
    OriginTimeout { seconds: u64 },

    #[error("Stream ended after {delivered} of {declared} declared bytes")]
    StreamShortWrite { declared: u64, delivered: u64 },

    #[error("Stream write of {attempted} bytes exceeds the {declared} declared bytes")]
    StreamOverflow { declared: u64, attempted: u64 },

    #[error("Client disconnected before the response completed")]
    ClientDisconnected,

    #[error("Cache error: {0}")]
    CacheError(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl GatewayError {
    /// Determine if this error should trigger a retry of the origin fetch
    ///
    /// Returns true only for transport-level failures that are potentially
    /// transient: connection errors and timeouts. A non-206 answer is never
    /// retried; an origin that responds but ignores the range is
    /// misconfigured, and asking again will not change its mind.
    pub fn should_retry(&self) -> bool {
        match self {
            // Transport failures may succeed on a fresh connection
            GatewayError::OriginRequest(_) => true,
            GatewayError::OriginTimeout { .. } => true,

            // The origin answered; its answer is authoritative
            GatewayError::OriginStatus { .. } => false,
            GatewayError::OriginContract(_) => false,

            // Client, store, and stream errors are not origin-transient
            GatewayError::ConfigError(_) => false,
            GatewayError::MethodNotAllowed { .. } => false,
            GatewayError::SnapshotNotFound { .. } => false,
            GatewayError::MetadataStore(_) => false,
            GatewayError::IoError(_) => false,
            GatewayError::StreamShortWrite { .. } => false,
            GatewayError::StreamOverflow { .. } => false,
            GatewayError::ClientDisconnected => false,
            GatewayError::CacheError(_) => false,
        }
    }

    /// Convert error to the HTTP status of the terminal response
    ///
    /// Client usage errors keep their specific status; a non-206 origin
    /// answer is forwarded with the origin's own status; upstream contract
    /// violations and internal failures map to 5xx.
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::SnapshotNotFound { .. } => StatusCode::NOT_FOUND,

            // Forward the origin's status unchanged
            GatewayError::OriginStatus { status, .. } => *status,

            GatewayError::OriginRequest(_) => StatusCode::BAD_GATEWAY,
            GatewayError::OriginTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            GatewayError::ConfigError(_)
            | GatewayError::MetadataStore(_)
            | GatewayError::IoError(_)
            | GatewayError::OriginContract(_)
            | GatewayError::StreamShortWrite { .. }
            | GatewayError::StreamOverflow { .. }
            | GatewayError::ClientDisconnected
            | GatewayError::CacheError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body text for the terminal error response
    ///
    /// Client-correctable errors get specific wording; everything else is a
    /// generic line so internal detail stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::MethodNotAllowed { method } => {
                format!("Method {} not allowed.", method)
            }
            GatewayError::SnapshotNotFound { .. } => "snapshot not found".to_string(),
            GatewayError::OriginStatus { status, range_end } => format!(
                "origin says {} while requesting range 0-{}",
                status.as_u16(),
                range_end
            ),
            GatewayError::OriginTimeout { seconds } => {
                format!("origin did not answer within {}s", seconds)
            }
            GatewayError::OriginRequest(_) => "origin unreachable".to_string(),
            GatewayError::OriginContract(msg) => format!("origin contract violation: {}", msg),
            _ => "internal error".to_string(),
        }
    }

    /// Create a MethodNotAllowed error from a request method
    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        GatewayError::MethodNotAllowed {
            method: method.into(),
        }
    }

    /// Create a SnapshotNotFound error from a snapshot id
    pub fn not_found(id: impl Into<String>) -> Self {
        GatewayError::SnapshotNotFound { id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::method_not_allowed("POST").to_http_status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            GatewayError::not_found("2023-11-01T00:00:00Z").to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::OriginTimeout { seconds: 30 }.to_http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::OriginContract("empty body".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_origin_status_forwarded_verbatim() {
        let err = GatewayError::OriginStatus {
            status: StatusCode::OK,
            range_end: 1023,
        };
        assert_eq!(err.to_http_status(), StatusCode::OK);

        let err = GatewayError::OriginStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            range_end: 10,
        };
        assert_eq!(err.to_http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_should_retry() {
        assert!(GatewayError::OriginRequest("connection refused".into()).should_retry());
        assert!(GatewayError::OriginTimeout { seconds: 30 }.should_retry());

        // A delivered answer is never retried, even a 5xx
        assert!(!GatewayError::OriginStatus {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            range_end: 99,
        }
        .should_retry());
        assert!(!GatewayError::OriginStatus {
            status: StatusCode::OK,
            range_end: 99,
        }
        .should_retry());
        assert!(!GatewayError::not_found("x").should_retry());
        assert!(!GatewayError::OriginContract("bad Content-Range".into()).should_retry());
    }

    #[test]
    fn test_client_messages() {
        let msg = GatewayError::method_not_allowed("DELETE").client_message();
        assert_eq!(msg, "Method DELETE not allowed.");

        let msg = GatewayError::OriginStatus {
            status: StatusCode::OK,
            range_end: 1023,
        }
        .client_message();
        assert!(msg.contains("200"));
        assert!(msg.contains("0-1023"));

        // Internal detail must not leak to clients
        let msg = GatewayError::MetadataStore("backend exploded at /var/lib".into()).client_message();
        assert_eq!(msg, "internal error");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: GatewayError = io.into();
        assert!(matches!(err, GatewayError::IoError(_)));
        assert_eq!(err.to_http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
