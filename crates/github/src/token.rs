use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use copycheck_core::{config::GitHubAppConfig, models::InstallationToken};
use http::{StatusCode, header};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

// Installation tokens are valid for roughly an hour; the cached expiry is
// pulled in by a margin so a token is never presented near its boundary.
const EXPIRY_MARGIN: Duration = Duration::minutes(10);
// The app JWT is backdated slightly to tolerate clock skew at GitHub's end.
const ASSERTION_BACKDATE: Duration = Duration::seconds(10);
const ASSERTION_VALIDITY: Duration = Duration::minutes(10);

/// Claims of the signed app assertion exchanged for an installation token.
#[derive(Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: u64,
}

struct CachedToken {
    token: String,
    expires: OffsetDateTime,
}

/// Owns the app signing key and a per-installation cache of short-lived
/// bearer tokens. All refreshes for all installations are serialized behind
/// one async mutex, so concurrent tasks never race a cache update.
pub struct TokenSupplier {
    app_id: u64,
    key: EncodingKey,
    api_base: String,
    http: reqwest::Client,
    tokens: Mutex<HashMap<u64, CachedToken>>,
}

impl TokenSupplier {
    pub fn new(config: &GitHubAppConfig, api_base: &str, http: reqwest::Client) -> Result<Self> {
        tracing::info!("Using key file {}", config.private_key_file);
        let pem = std::fs::read(&config.private_key_file)
            .with_context(|| format!("Failed to read key file {}", config.private_key_file))?;
        Self::from_pem(config.id, &pem, api_base, http)
    }

    pub fn from_pem(app_id: u64, pem: &[u8], api_base: &str, http: reqwest::Client) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(pem).context("Failed to parse RSA private key")?;
        Ok(Self {
            app_id,
            key,
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Returns a bearer token for the installation, refreshing it through the
    /// access-token endpoint unless a still-valid cached one exists.
    pub async fn get_token(&self, installation_id: u64) -> Result<String> {
        let mut tokens = self.tokens.lock().await;
        let now = OffsetDateTime::now_utc();
        if let Some(cached) = tokens.get(&installation_id)
            && now < cached.expires
        {
            return Ok(cached.token.clone());
        }

        let assertion = self.sign_assertion(now)?;
        let url = format!("{}/app/installations/{installation_id}/access_tokens", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&assertion)
            .header(header::ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await
            .with_context(|| format!("Failed to request a token for installation {installation_id}"))?;
        let status = response.status();
        if status != StatusCode::CREATED {
            bail!("Installation token exchange returned {status}");
        }
        let token: InstallationToken =
            response.json().await.context("Failed to parse installation token response")?;

        tracing::debug!(installation_id, "Issued installation token");
        let result = token.token.clone();
        tokens.insert(
            installation_id,
            CachedToken { token: token.token, expires: token.expires_at - EXPIRY_MARGIN },
        );
        Ok(result)
    }

    fn sign_assertion(&self, now: OffsetDateTime) -> Result<String> {
        let claims = Claims {
            iat: (now - ASSERTION_BACKDATE).unix_timestamp(),
            exp: (now + ASSERTION_VALIDITY).unix_timestamp(),
            iss: self.app_id,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .context("Failed to sign app assertion")
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use time::format_description::well_known::Rfc3339;

    use super::*;

    const TEST_KEY: &[u8] = include_bytes!("../testdata/app-key.pem");

    fn supplier(api_base: &str) -> TokenSupplier {
        TokenSupplier::from_pem(125351, TEST_KEY, api_base, reqwest::Client::new()).unwrap()
    }

    fn token_body(token: &str, expires_in: Duration) -> String {
        let expires_at = (OffsetDateTime::now_utc() + expires_in).format(&Rfc3339).unwrap();
        format!(r#"{{"token":"{token}","expires_at":"{expires_at}"}}"#)
    }

    #[test]
    fn rejects_malformed_key() {
        let result =
            TokenSupplier::from_pem(1, b"not a pem", "https://example.test", reqwest::Client::new());
        assert!(result.is_err());
    }

    #[test]
    fn reads_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-key.pem");
        std::fs::write(&path, TEST_KEY).unwrap();
        let config = GitHubAppConfig {
            id: 125351,
            private_key_file: path.to_str().unwrap().to_string(),
            webhook_secret: None,
        };
        assert!(TokenSupplier::new(&config, "https://example.test", reqwest::Client::new()).is_ok());

        let config = GitHubAppConfig {
            id: 125351,
            private_key_file: dir.path().join("missing.pem").to_str().unwrap().to_string(),
            webhook_secret: None,
        };
        assert!(TokenSupplier::new(&config, "https://example.test", reqwest::Client::new()).is_err());
    }

    #[tokio::test]
    async fn caches_token_within_validity_window() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/app/installations/42/access_tokens")
            .match_header("authorization", Matcher::Regex("Bearer .+".to_string()))
            .with_status(201)
            .with_body(token_body("tok-1", Duration::hours(1)))
            .expect(1)
            .create_async()
            .await;

        let supplier = supplier(&server.url());
        let first = supplier.get_token(42).await.unwrap();
        let second = supplier.get_token(42).await.unwrap();
        assert_eq!(first, "tok-1");
        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn refreshes_expired_token() {
        let mut server = mockito::Server::new_async().await;
        // Reported expiry is inside the safety margin, so the cached entry is
        // already stale by the time of the second call.
        let mock = server
            .mock("POST", "/app/installations/42/access_tokens")
            .with_status(201)
            .with_body(token_body("tok-short", Duration::minutes(5)))
            .expect(2)
            .create_async()
            .await;

        let supplier = supplier(&server.url());
        supplier.get_token(42).await.unwrap();
        supplier.get_token(42).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn caches_tokens_per_installation() {
        let mut server = mockito::Server::new_async().await;
        let mock_a = server
            .mock("POST", "/app/installations/1/access_tokens")
            .with_status(201)
            .with_body(token_body("tok-a", Duration::hours(1)))
            .expect(1)
            .create_async()
            .await;
        let mock_b = server
            .mock("POST", "/app/installations/2/access_tokens")
            .with_status(201)
            .with_body(token_body("tok-b", Duration::hours(1)))
            .expect(1)
            .create_async()
            .await;

        let supplier = supplier(&server.url());
        assert_eq!(supplier.get_token(1).await.unwrap(), "tok-a");
        assert_eq!(supplier.get_token(2).await.unwrap(), "tok-b");
        assert_eq!(supplier.get_token(1).await.unwrap(), "tok-a");
        mock_a.assert_async().await;
        mock_b.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_exchange_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/app/installations/42/access_tokens")
            .with_status(401)
            .with_body("{}")
            .create_async()
            .await;

        let supplier = supplier(&server.url());
        let error = supplier.get_token(42).await.unwrap_err();
        assert!(error.to_string().contains("401"));
    }
}
