//! Bearer token resolution for automation runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::AutomationError;

/// A usable OAuth credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Source of bearer tokens for Business Profile calls.
///
/// Implementations refresh expired tokens internally and return `None`
/// (never an error) when the user has no usable credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_valid_token(&self, user_id: &str) -> Option<Credential>;

    /// Users this provider currently holds credentials for.
    async fn known_users(&self) -> Vec<String>;
}

/// How to behave when the configured user has no usable token.
///
/// `AnyCredentialFallback` borrows any other stored credential. It suits a
/// single-operator deployment and is not a tenant boundary; multi-tenant
/// deployments should use `ConfiguredUserOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialPolicy {
    ConfiguredUserOnly,
    #[default]
    AnyCredentialFallback,
}

impl std::str::FromStr for CredentialPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "configured_user" | "configured" | "strict" => Ok(Self::ConfiguredUserOnly),
            "any_credential_fallback" | "any" | "fallback" => Ok(Self::AnyCredentialFallback),
            _ => Err(format!(
                "invalid credential policy '{}', expected 'configured_user' or 'any_credential_fallback'",
                s
            )),
        }
    }
}

/// Where a pipeline run gets its token from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Ask the credential provider, honouring the fallback policy.
    Provider,
    /// Caller-supplied token; the provider is bypassed.
    Supplied(SecretString),
}

/// A token together with how it was obtained.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub token: SecretString,
    /// User the token belongs to (`None` for caller-supplied tokens).
    pub user_id: Option<String>,
    pub via_fallback: bool,
}

/// Resolves tokens according to a [`CredentialPolicy`].
#[derive(Clone)]
pub struct TokenResolver {
    provider: Arc<dyn CredentialProvider>,
    policy: CredentialPolicy,
    timeout: Duration,
}

impl TokenResolver {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        policy: CredentialPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> CredentialPolicy {
        self.policy
    }

    /// Resolve a token for `user_id`, or fail with `AuthenticationRequired`.
    pub async fn resolve(
        &self,
        user_id: &str,
        source: &TokenSource,
    ) -> Result<ResolvedCredential, AutomationError> {
        if let TokenSource::Supplied(token) = source {
            return Ok(ResolvedCredential {
                token: token.clone(),
                user_id: None,
                via_fallback: false,
            });
        }

        if let Some(credential) = self.lookup(user_id).await {
            return Ok(ResolvedCredential {
                token: credential.access_token,
                user_id: Some(user_id.to_string()),
                via_fallback: false,
            });
        }

        let fallback_attempted = self.policy == CredentialPolicy::AnyCredentialFallback;
        if fallback_attempted {
            for candidate in self.provider.known_users().await {
                if candidate == user_id {
                    continue;
                }
                if let Some(credential) = self.lookup(&candidate).await {
                    tracing::warn!(
                        configured_user = user_id,
                        used_user = %candidate,
                        "No token for configured user, using another stored credential"
                    );
                    return Ok(ResolvedCredential {
                        token: credential.access_token,
                        user_id: Some(candidate),
                        via_fallback: true,
                    });
                }
            }
        }

        Err(AutomationError::AuthenticationRequired {
            user_id: user_id.to_string(),
            fallback_attempted,
        })
    }

    async fn lookup(&self, user_id: &str) -> Option<Credential> {
        match tokio::time::timeout(self.timeout, self.provider.get_valid_token(user_id)).await {
            Ok(credential) => credential,
            Err(_) => {
                tracing::warn!(user_id, timeout = ?self.timeout, "Credential lookup timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::testing::StaticCredentials;

    fn resolver(provider: StaticCredentials, policy: CredentialPolicy) -> TokenResolver {
        TokenResolver::new(Arc::new(provider), policy, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_configured_user_token() {
        let provider = StaticCredentials::new().with_token("owner", "tok-owner");
        let resolved = resolver(provider, CredentialPolicy::ConfiguredUserOnly)
            .resolve("owner", &TokenSource::Provider)
            .await
            .unwrap();
        assert_eq!(resolved.token.expose_secret(), "tok-owner");
        assert!(!resolved.via_fallback);
    }

    #[tokio::test]
    async fn test_fallback_uses_other_user() {
        let provider = StaticCredentials::new().with_token("someone-else", "tok-other");
        let resolved = resolver(provider, CredentialPolicy::AnyCredentialFallback)
            .resolve("default", &TokenSource::Provider)
            .await
            .unwrap();
        assert_eq!(resolved.token.expose_secret(), "tok-other");
        assert_eq!(resolved.user_id.as_deref(), Some("someone-else"));
        assert!(resolved.via_fallback);
    }

    #[tokio::test]
    async fn test_strict_policy_does_not_fall_back() {
        let provider = StaticCredentials::new().with_token("someone-else", "tok-other");
        let err = resolver(provider, CredentialPolicy::ConfiguredUserOnly)
            .resolve("default", &TokenSource::Provider)
            .await
            .unwrap_err();
        match err {
            AutomationError::AuthenticationRequired {
                user_id,
                fallback_attempted,
            } => {
                assert_eq!(user_id, "default");
                assert!(!fallback_attempted);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_credentials_anywhere() {
        let err = resolver(StaticCredentials::new(), CredentialPolicy::AnyCredentialFallback)
            .resolve("default", &TokenSource::Provider)
            .await
            .unwrap_err();
        assert!(err.requires_auth());
    }

    #[tokio::test]
    async fn test_supplied_token_bypasses_provider() {
        let resolved = resolver(StaticCredentials::new(), CredentialPolicy::ConfiguredUserOnly)
            .resolve(
                "default",
                &TokenSource::Supplied(SecretString::from("caller-token")),
            )
            .await
            .unwrap();
        assert_eq!(resolved.token.expose_secret(), "caller-token");
        assert_eq!(resolved.user_id, None);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "strict".parse::<CredentialPolicy>().unwrap(),
            CredentialPolicy::ConfiguredUserOnly
        );
        assert_eq!(
            "ANY".parse::<CredentialPolicy>().unwrap(),
            CredentialPolicy::AnyCredentialFallback
        );
        assert!("maybe".parse::<CredentialPolicy>().is_err());
    }
}
