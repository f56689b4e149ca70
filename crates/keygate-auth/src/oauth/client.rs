//! OAuth 2.0 client records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::scope::ScopeSet;

/// Whether a client can keep a secret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Browser or native apps. Authenticated by PKCE only.
    #[default]
    Public,
    /// Server-side apps with a client secret.
    Confidential,
}

impl ClientType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Confidential => "confidential",
        }
    }
}

/// A registered client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub name: String,
    pub client_type: ClientType,
    /// Argon2 PHC hash. Absent for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_hash: Option<String>,
    pub redirect_uris: Vec<String>,
    pub scopes: ScopeSet,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub secret_rotated_at: Option<OffsetDateTime>,
}

impl Client {
    /// Exact string comparison. No prefix, trailing-slash or case folding.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential
    }
}

/// Registration request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientMetadata {
    #[serde(alias = "client_name")]
    pub name: String,
    #[serde(default)]
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    /// Space-delimited. Defaults to every supported scope.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Registration result. The secret is only ever shown here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_name: String,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub scope: ScopeSet,
    pub client_id_issued_at: i64,
}

/// Credentials presented at the token, introspection and revocation endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    #[must_use]
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    #[must_use]
    pub fn with_secret(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(secret.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client {
            client_id: "app".to_string(),
            name: "App".to_string(),
            client_type: ClientType::Public,
            client_secret_hash: None,
            redirect_uris: vec!["https://app.example/cb".to_string()],
            scopes: ScopeSet::parse("openid").unwrap(),
            created_at: OffsetDateTime::now_utc(),
            secret_rotated_at: None,
        }
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let client = client();
        assert!(client.is_redirect_uri_allowed("https://app.example/cb"));
        assert!(!client.is_redirect_uri_allowed("https://app.example/cb/"));
        assert!(!client.is_redirect_uri_allowed("https://app.example/cb?x=1"));
        assert!(!client.is_redirect_uri_allowed("HTTPS://app.example/cb"));
    }

    #[test]
    fn test_metadata_accepts_client_name_alias() {
        let json = r#"{"client_name": "App", "redirect_uris": ["https://app.example/cb"]}"#;
        let metadata: ClientMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.name, "App");
        assert_eq!(metadata.client_type, ClientType::Public);
    }
}
