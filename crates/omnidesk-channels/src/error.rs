use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rate limited by {channel} (retry after {retry_after_secs}s)")]
    RateLimited {
        channel: String,
        retry_after_secs: u64,
    },

    #[error("{channel} rejected the credentials (HTTP {status})")]
    Unauthorized { channel: String, status: u16 },

    #[error("endpoint not found: {url}")]
    NotFound { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("missing or invalid field '{field}' in channel payload")]
    Mapping { field: String },

    #[error("{operation} is not supported for {channel}")]
    NotSupported {
        channel: String,
        operation: String,
    },

    #[error("{channel} is not configured")]
    NotConfigured { channel: String },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("pagination limit reached for {url}: exceeded {max_pages} pages")]
    PaginationLimit { url: String, max_pages: usize },
}

impl ChannelError {
    pub(crate) fn mapping(field: impl Into<String>) -> Self {
        ChannelError::Mapping {
            field: field.into(),
        }
    }

    pub(crate) fn not_supported(channel: impl Into<String>, operation: impl Into<String>) -> Self {
        ChannelError::NotSupported {
            channel: channel.into(),
            operation: operation.into(),
        }
    }

    /// HTTP status returned by the channel, when the failure carried one.
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ChannelError::Unauthorized { status, .. }
            | ChannelError::UnexpectedStatus { status, .. } => Some(*status),
            ChannelError::RateLimited { .. } => Some(429),
            ChannelError::NotFound { .. } => Some(404),
            ChannelError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Failures that a later attempt cannot fix. Queue workers fail these
    /// immediately instead of scheduling a retry.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ChannelError::NotSupported { .. }
                | ChannelError::NotConfigured { .. }
                | ChannelError::Mapping { .. }
                | ChannelError::Unauthorized { .. }
                | ChannelError::InvalidUrl { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_is_permanent() {
        let err = ChannelError::not_supported("amazon", "fetch orders");
        assert!(err.is_permanent());
        assert_eq!(err.to_string(), "fetch orders is not supported for amazon");
    }

    #[test]
    fn server_errors_are_not_permanent() {
        let err = ChannelError::UnexpectedStatus {
            status: 503,
            url: "https://example.test/api/orders".to_string(),
        };
        assert!(!err.is_permanent());
        assert_eq!(err.upstream_status(), Some(503));
    }

    #[test]
    fn mapping_error_names_the_field() {
        let err = ChannelError::mapping("order_id");
        assert_eq!(
            err.to_string(),
            "missing or invalid field 'order_id' in channel payload"
        );
        assert_eq!(err.upstream_status(), None);
    }
}
