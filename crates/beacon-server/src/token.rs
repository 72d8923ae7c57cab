//! HS256 token issuance and verification.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Claims, Clock, Token, TokenError, TokenType};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::TokenConfig;

pub struct TokenAuthority {
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenAuthority {
    pub fn new(config: &TokenConfig, clock: Arc<dyn Clock>) -> Result<Self, TokenError> {
        if config.secret.is_empty() {
            return Err(TokenError::Configuration(
                "signing secret is required".to_string(),
            ));
        }

        // Expiry is checked against the injected clock, audience is opaque.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            issuer: config.issuer.clone(),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            clock,
        })
    }

    /// Issue an access token. Overwrites `iss`, `iat` and `exp`.
    pub fn generate(&self, claims: Claims) -> Result<Token, TokenError> {
        self.issue(claims, TokenType::Access, self.access_ttl)
    }

    /// Issue a refresh token, same wire format with the refresh TTL.
    pub fn generate_refresh(&self, claims: Claims) -> Result<Token, TokenError> {
        self.issue(claims, TokenType::Refresh, self.refresh_ttl)
    }

    fn issue(
        &self,
        mut claims: Claims,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<Token, TokenError> {
        let now = self.clock.now_secs();
        let expires_at = now.saturating_add(ttl.as_secs());

        claims.iss = self.issuer.clone();
        claims.iat = now;
        claims.exp = expires_at;

        let value = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        let label = match token_type {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        };
        counter!("beacon_tokens_issued_total", "type" => label).increment(1);
        debug!(subject = %claims.sub, token_type = label, expires_at, "token issued");

        Ok(Token {
            value,
            token_type,
            issued_at: now,
            expires_at,
        })
    }

    /// Verify structure, signature and expiry, returning the embedded claims.
    pub fn validate(&self, value: &str) -> Result<Claims, TokenError> {
        let result = self.verify(value);
        if let Err(err) = &result {
            counter!("beacon_token_rejections_total", "reason" => err.reason()).increment(1);
            debug!(reason = err.reason(), "token rejected");
        }
        result
    }

    fn verify(&self, value: &str) -> Result<Claims, TokenError> {
        let segments: Vec<&str> = value.split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(TokenError::InvalidFormat);
        };

        let message = format!("{header}.{payload}");
        let expected = jsonwebtoken::crypto::sign(message.as_bytes(), &self.encoding_key, Algorithm::HS256)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(TokenError::InvalidSignature);
        }

        let claims = decode::<Claims>(value, &self.decoding_key, &self.validation)
            .map_err(|_| TokenError::InvalidFormat)?
            .claims;

        if self.clock.now_secs() > claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Validate `value` and issue a fresh access token from its claims.
    ///
    /// The presented token's type is not checked and the signing key is not
    /// rotated.
    pub fn refresh(&self, value: &str) -> Result<Token, TokenError> {
        let claims = self.validate(value)?;
        self.generate(claims)
    }

    /// Accepts a revocation request without enforcing it.
    pub fn revoke(&self, _value: &str) {
        // TODO: keep a deny-list keyed by `jti` and consult it in `validate`.
        warn!("token revocation requested but revocation is not enforced");
    }
}
