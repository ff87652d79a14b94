//! Bearer token acquisition for the cloud agent

use crate::error::CloudError;
use std::path::PathBuf;
use tracing::debug;

/// Source of the bearer token sent with every agent request.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    /// Acquire a token. An empty token is an authentication error.
    async fn authorize(&self) -> Result<String, CloudError>;
}

/// Token supplied directly (e.g., from an environment variable)
#[derive(Debug, Clone)]
pub struct StaticTokenAuthorizer {
    token: String,
}

impl StaticTokenAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait::async_trait]
impl Authorizer for StaticTokenAuthorizer {
    async fn authorize(&self) -> Result<String, CloudError> {
        non_empty(self.token.trim().to_string())
    }
}

/// Token read from a mounted file (e.g., a projected service account token)
#[derive(Debug, Clone)]
pub struct TokenFileAuthorizer {
    path: PathBuf,
}

impl TokenFileAuthorizer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Authorizer for TokenFileAuthorizer {
    async fn authorize(&self) -> Result<String, CloudError> {
        debug!(path = %self.path.display(), "Reading cloud agent token");
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CloudError::Authentication(format!(
                "failed to read token file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        non_empty(raw.trim().to_string())
    }
}

fn non_empty(token: String) -> Result<String, CloudError> {
    if token.is_empty() {
        return Err(CloudError::Authentication("empty token".to_string()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let auth = StaticTokenAuthorizer::new(" secret \n");
        assert_eq!(auth.authorize().await.unwrap(), "secret");
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let err = StaticTokenAuthorizer::new("  ").authorize().await.unwrap_err();
        assert!(matches!(err, CloudError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_token_file() {
        let path = std::env::temp_dir().join(format!("cloud-token-{}", std::process::id()));
        tokio::fs::write(&path, "file-token\n").await.unwrap();
        let token = TokenFileAuthorizer::new(&path).authorize().await.unwrap();
        assert_eq!(token, "file-token");
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_missing_token_file() {
        let err = TokenFileAuthorizer::new("/nonexistent/cloud-token")
            .authorize()
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Authentication(_)));
    }
}
