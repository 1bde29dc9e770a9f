//! External identity provider (Google OAuth)
//!
//! Callers identify themselves with the ID token issued by the provider. The
//! server keeps no session: every authenticated request verifies its token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Tokens returned by the provider, passed through to the client unchanged
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges an authorization code for a token set
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, IdentityError>;

    /// Exchanges a refresh token for a fresh token set
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, IdentityError>;

    /// Verifies an ID token and returns its subject
    async fn verify_id_token(&self, id_token: &str) -> Result<String, IdentityError>;
}

#[derive(Debug, Clone)]
pub struct GoogleSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

pub struct GoogleIdentity {
    http: reqwest::Client,
    settings: GoogleSettings,
}

#[derive(Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    iss: String,
}

impl GoogleIdentity {
    pub fn new(settings: GoogleSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, IdentityError> {
        let response = self.http.post(GOOGLE_TOKEN_URL).form(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::Provider {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentity {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, IdentityError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, IdentityError> {
        let mut tokens = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
            ])
            .await?;

        // Google does not rotate refresh tokens, hand the current one back.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<String, IdentityError> {
        let response = self
            .http
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(IdentityError::Provider {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(IdentityError::InvalidToken(format!(
                "tokeninfo answered {}",
                status
            )));
        }

        let info: TokenInfo = response.json().await?;
        check_claims(&info, &self.settings.client_id)?;
        Ok(info.sub)
    }
}

fn check_claims(info: &TokenInfo, client_id: &str) -> Result<(), IdentityError> {
    if info.aud != client_id {
        return Err(IdentityError::InvalidToken("audience mismatch".to_string()));
    }
    if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
        return Err(IdentityError::InvalidToken(format!(
            "unexpected issuer {}",
            info.iss
        )));
    }
    if info.sub.is_empty() {
        return Err(IdentityError::InvalidToken("empty subject".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(aud: &str, iss: &str, sub: &str) -> TokenInfo {
        TokenInfo {
            aud: aud.to_string(),
            sub: sub.to_string(),
            iss: iss.to_string(),
        }
    }

    #[test]
    fn test_claims_accept_google_issuers() {
        assert!(check_claims(&info("client", "accounts.google.com", "42"), "client").is_ok());
        assert!(
            check_claims(&info("client", "https://accounts.google.com", "42"), "client").is_ok()
        );
    }

    #[test]
    fn test_claims_reject_foreign_tokens() {
        assert!(check_claims(&info("other", "accounts.google.com", "42"), "client").is_err());
        assert!(check_claims(&info("client", "evil.example", "42"), "client").is_err());
        assert!(check_claims(&info("client", "accounts.google.com", ""), "client").is_err());
    }

    #[test]
    fn test_token_set_omits_missing_fields() {
        let tokens = TokenSet {
            access_token: "at".to_string(),
            id_token: Some("it".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(json, serde_json::json!({ "access_token": "at", "id_token": "it" }));
    }
}
