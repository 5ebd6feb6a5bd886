//! Access-token provider.
//!
//! Obtains and caches OAuth2 bearer tokens for the Realtime Database REST
//! interface:
//! - Fast path returns the in-memory token without I/O while it is valid
//! - Single-flight refresh so concurrent callers share one exchange
//! - Optional external [`TokenStore`] so multiple processes can share a token;
//!   store failures are logged and treated as a cache miss, never propagated
//! - Graceful fallback to a still-usable token when the exchange fails

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::credentials::ServiceAccountCredentials;
use crate::error::{FirekvError, FirekvResult};
use crate::metrics::record_token_refresh;

// =============================================================================
// Constants
// =============================================================================

/// Refresh margin: refresh the token 60 seconds before its recorded expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Conservative token TTL (55 minutes). OAuth tokens are valid for 60 minutes;
/// the recorded expiry stays under the provider's real one.
const TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

/// Lifetime of the signed JWT assertion sent to the token endpoint.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// OAuth grant type for service-account JWT assertions.
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// OAuth scopes required for Realtime Database access.
pub const DATABASE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/firebase.database",
];

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Token Record
// =============================================================================

/// A bearer token with its absolute expiry in epoch milliseconds.
///
/// Serializable so external stores can persist it across processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub expires_at_ms: i64,
}

impl TokenRecord {
    /// Token is valid with the refresh margin applied.
    fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && now_ms() + (TOKEN_REFRESH_MARGIN.as_millis() as i64) < self.expires_at_ms
    }

    /// Token is technically still usable (even if a refresh is due).
    fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && now_ms() < self.expires_at_ms
    }
}

// =============================================================================
// External Token Store
// =============================================================================

/// Error type for external token stores.
pub type TokenStoreError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied persistence for token records.
///
/// Both operations may fail; failures are swallowed by the cache (logged at
/// `warn` level) and never affect database operations.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the persisted record, if any.
    async fn load(&self) -> Result<Option<TokenRecord>, TokenStoreError>;

    /// Persist a freshly exchanged record.
    async fn save(&self, record: &TokenRecord) -> Result<(), TokenStoreError>;
}

// =============================================================================
// Token Cache
// =============================================================================

/// Thread-safe token cache with single-flight refresh.
pub struct TokenCache {
    http: reqwest::Client,
    credentials: ServiceAccountCredentials,
    signing_key: EncodingKey,
    store: Option<Arc<dyn TokenStore>>,
    cache: RwLock<Option<TokenRecord>>,
}

impl TokenCache {
    /// Create a new token cache.
    ///
    /// Fails if the credential's private key is not a parseable RSA PEM, so a
    /// broken key surfaces at construction rather than on the first request.
    pub fn new(
        http: reqwest::Client,
        credentials: ServiceAccountCredentials,
        store: Option<Arc<dyn TokenStore>>,
    ) -> FirekvResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| {
                FirekvError::auth(format!("Invalid service account private key: {}", e))
            })?;

        Ok(Self {
            http,
            credentials,
            signing_key,
            store,
            cache: RwLock::new(None),
        })
    }

    /// Invalidate the cached token.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// Single-flight: the fast path reads the cache under a read lock; a
    /// refresh holds the write lock, so concurrent callers needing a refresh
    /// wait for the one in flight and then hit the double-check instead of
    /// issuing their own exchange.
    pub async fn get_token(&self) -> FirekvResult<String> {
        // Fast path: no I/O while the cached token is valid
        {
            let cache = self.cache.read().await;
            if let Some(record) = cache.as_ref() {
                if record.is_valid() {
                    return Ok(record.access_token.clone());
                }
            }
        }

        // Slow path: acquire write lock and refresh
        let mut cache = self.cache.write().await;

        // Double-check: another task may have refreshed while we waited
        if let Some(record) = cache.as_ref() {
            if record.is_valid() {
                return Ok(record.access_token.clone());
            }
        }

        self.refresh_token(&mut cache).await
    }

    /// Refresh the token, updating the cache.
    async fn refresh_token(&self, cache: &mut Option<TokenRecord>) -> FirekvResult<String> {
        // An externally persisted record may still be valid (another process
        // refreshed it). Store failures are a cache miss, not an error.
        if let Some(store) = &self.store {
            match store.load().await {
                Ok(Some(record)) if record.is_valid() => {
                    debug!("Adopted access token from external store");
                    record_token_refresh("store_hit");
                    let token = record.access_token.clone();
                    *cache = Some(record);
                    return Ok(token);
                }
                Ok(_) => {}
                Err(e) => warn!("Token store read failed, treating as miss: {}", e),
            }
        }

        match self.exchange_credentials().await {
            Ok(record) => {
                record_token_refresh("exchanged");

                if let Some(store) = &self.store {
                    // Best effort: a failed write must not fail the caller.
                    if let Err(e) = store.save(&record).await {
                        warn!("Token store write failed, continuing: {}", e);
                    }
                }

                let token = record.access_token.clone();
                *cache = Some(record);
                debug!("Refreshed access token, valid for ~55 minutes");
                Ok(token)
            }
            Err(e) => {
                record_token_refresh("failed");

                // On exchange failure, fall back to a token past its refresh
                // margin but not yet expired.
                if let Some(record) = cache.as_ref() {
                    if record.is_usable() {
                        warn!("Token exchange failed, using existing token: {}", e);
                        return Ok(record.access_token.clone());
                    }
                }

                Err(e)
            }
        }
    }

    /// Exchange service-account credentials for a bearer token.
    async fn exchange_credentials(&self) -> FirekvResult<TokenRecord> {
        let assertion = self.build_assertion()?;

        let response = self
            .http
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FirekvError::auth(format!(
                "Token exchange failed ({}): {}",
                status, body
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let parsed: TokenResponse = response.json().await?;
        if parsed.access_token.is_empty() {
            return Err(FirekvError::auth("Token exchange returned an empty token"));
        }

        Ok(TokenRecord {
            access_token: parsed.access_token,
            expires_at_ms: now_ms() + TOKEN_TTL.as_millis() as i64,
        })
    }

    /// Build the signed JWT assertion for the token endpoint.
    fn build_assertion(&self) -> FirekvResult<String> {
        #[derive(Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: String,
            aud: &'a str,
            iat: i64,
            exp: i64,
        }

        let iat = now_ms() / 1000;
        let claims = Claims {
            iss: &self.credentials.client_email,
            scope: DATABASE_SCOPES.join(" "),
            aud: &self.credentials.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.credentials.private_key_id.clone();

        encode(&header, &claims, &self.signing_key)
            .map_err(|e| FirekvError::auth(format!("Failed to sign token assertion: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
