//! Error types for sync runs and provider calls
//!
//! Errors are classified by recoverability:
//! - Retryable: network issues, provider 429/5xx
//! - NonRetryable: bad settings, unknown adapters, store failures
//! - RequiresUserAction: missing or revoked OAuth credentials, disabled integrations

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::db::DbError;

/// Failure talking to an external provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Access token rejected")]
    Unauthorized,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Refresh token expired or revoked")]
    RefreshRevoked,

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Api { status, .. } => *status == 429 || *status == 408 || *status >= 500,
            _ => false,
        }
    }
}

/// Failure of a sync run or of the configuration it depends on.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Integration '{0}' is not configured")]
    NotConfigured(String),

    #[error("Integration '{0}' is disabled")]
    IntegrationDisabled(String),

    #[error("No adapter for provider '{provider}' and data kind '{data_kind}'")]
    UnknownAdapter { provider: String, data_kind: String },

    #[error("{provider} credentials expired and no refresh token is stored. Re-authenticate {provider} to resume syncing.")]
    ReauthRequired { provider: String },

    #[error("{provider}: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("Invalid {provider} settings: {message}")]
    InvalidSettings { provider: String, message: String },

    #[error("Settings encryption: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Database: {0}")]
    Db(#[from] DbError),

    #[error("Sync job not found: {0}")]
    JobNotFound(String),
}

impl SyncError {
    /// Wrap a provider failure, turning a revoked refresh token into a
    /// re-authentication request.
    pub fn provider(provider: &str, source: ProviderError) -> Self {
        match source {
            ProviderError::RefreshRevoked | ProviderError::Unauthorized => SyncError::ReauthRequired {
                provider: provider.to_string(),
            },
            source => SyncError::Provider {
                provider: provider.to_string(),
                source,
            },
        }
    }

    /// Returns true if running the sync again may succeed without changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Provider { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if an operator has to act before the sync can succeed.
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SyncError::NotConfigured(_)
                | SyncError::IntegrationDisabled(_)
                | SyncError::ReauthRequired { .. }
                | SyncError::InvalidSettings { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SyncError::NotConfigured(_) => "Connect the integration before syncing.",
            SyncError::IntegrationDisabled(_) => "Enable the integration and try again.",
            SyncError::UnknownAdapter { .. } => "Check the provider and data kind names.",
            SyncError::ReauthRequired { .. } => "Re-authenticate the integration to store fresh credentials.",
            SyncError::Provider { source, .. } if source.is_retryable() => {
                "The provider is unavailable or rate limiting. Wait a few minutes and try again."
            }
            SyncError::Provider { .. } => "Check the provider response in the job errors.",
            SyncError::InvalidSettings { .. } => "Reconnect the integration with valid settings.",
            SyncError::Crypto(_) => "Check that the master key matches the one used to connect.",
            SyncError::Db(_) => "Check file permissions and disk space for the database.",
            SyncError::JobNotFound(_) => "Check the job id.",
        }
    }
}

/// Serializable error representation for callers outside the crate.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorView {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&SyncError> for ErrorView {
    fn from(err: &SyncError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        ErrorView {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reauth_message_is_actionable() {
        let err = SyncError::ReauthRequired { provider: "hubspot".into() };
        assert!(err.to_string().contains("Re-authenticate"));
        assert!(err.requires_user_action());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_revoked_refresh_maps_to_reauth() {
        let err = SyncError::provider("sheets", ProviderError::RefreshRevoked);
        assert!(matches!(err, SyncError::ReauthRequired { ref provider } if provider == "sheets"));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = SyncError::provider(
            "harvest",
            ProviderError::Api { status: 503, message: "down".into() },
        );
        assert!(err.is_retryable());
        let view = ErrorView::from(&err);
        assert_eq!(view.error_type, ErrorType::Retryable);
        assert!(view.can_retry);

        let not_found = SyncError::provider(
            "harvest",
            ProviderError::Api { status: 404, message: "gone".into() },
        );
        assert!(!not_found.is_retryable());
    }
}
