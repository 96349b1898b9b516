//! Datacenter credential sources

use async_trait::async_trait;

use crate::error::TokenError;

/// Supplies the bearer credential for every node of one datacenter.
///
/// Implementations may cache and refresh; the token is requested fresh on
/// every attempt so a datacenter switch picks up the new credential.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn token(&self) -> Result<String, TokenError>;
}

/// Token provider returning a fixed credential. An empty token means the
/// transport sends no credential at all.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// A provider that sends no credential.
    pub fn none() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}
