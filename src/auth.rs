// Bearer identity verification

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::AuthConfig;

/// A signed-in caller, as established by the identity verifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
}

/// Turns a bearer token into an identity. Returns None for unknown tokens.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Identity>;
}

/// Verifier backed by the `[auth].tokens` table in config
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn from_config(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|t| {
                (
                    t.token.clone(),
                    Identity {
                        uid: t.uid.clone(),
                        email: t.email.to_lowercase(),
                        display_name: t.display_name.clone(),
                        photo_url: None,
                        email_verified: true,
                    },
                )
            })
            .collect();
        StaticTokenVerifier { tokens }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

/// Whether an identity may use the API under the allow-list (empty list allows all)
pub fn is_allowed(allowed_users: &[String], identity: &Identity) -> bool {
    allowed_users.is_empty()
        || allowed_users
            .iter()
            .any(|u| u.eq_ignore_ascii_case(&identity.email))
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenIdentity;

    fn config() -> AuthConfig {
        AuthConfig {
            allowed_users: Vec::new(),
            tokens: vec![TokenIdentity {
                token: "t0ken".into(),
                uid: "u1".into(),
                email: "Drummer@Example.com".into(),
                display_name: Some("Drummer".into()),
            }],
        }
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticTokenVerifier::from_config(&config());
        let identity = verifier.verify("t0ken").await.expect("token should verify");
        assert_eq!(identity.uid, "u1");
        assert_eq!(identity.email, "drummer@example.com");
        assert!(verifier.verify("wrong").await.is_none());
    }

    #[test]
    fn test_allow_list() {
        let identity = Identity {
            uid: "u1".into(),
            email: "drummer@example.com".into(),
            display_name: None,
            photo_url: None,
            email_verified: true,
        };
        assert!(is_allowed(&[], &identity));
        assert!(is_allowed(&["DRUMMER@example.com".into()], &identity));
        assert!(!is_allowed(&["bass@example.com".into()], &identity));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
