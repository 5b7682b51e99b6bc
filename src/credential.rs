use anyhow::{anyhow, bail, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CredentialConfig;

const MIN_SECRET_LEN: usize = 32;

/// Issues a signed login credential for an authenticated identity.
pub trait CredentialIssuer {
    fn issue(&self, identity: &str) -> Result<String>;
}

impl<C: CredentialIssuer + ?Sized> CredentialIssuer for &C {
    fn issue(&self, identity: &str) -> Result<String> {
        (**self).issue(identity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// HS256 JWT issuer. The identity string becomes the token subject.
pub struct JwtIssuer {
    issuer: String,
    audience: String,
    ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIssuer {
    pub fn new(secret: &[u8], issuer: &str, audience: &str, ttl: Duration) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            bail!("signing secret must be at least {MIN_SECRET_LEN} bytes");
        }
        if ttl <= Duration::zero() {
            bail!("credential lifetime must be positive");
        }
        Ok(Self {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        })
    }

    /// Reads the secret from the environment variable named in config.
    pub fn from_config(cfg: &CredentialConfig) -> Result<Self> {
        let secret = std::env::var(&cfg.secret_env)
            .map_err(|_| anyhow!("signing secret not set; export ${}", cfg.secret_env))?;
        Self::new(
            secret.as_bytes(),
            &cfg.issuer,
            &cfg.audience,
            Duration::minutes(cfg.ttl_minutes),
        )
    }

    /// Checks signature, issuer, audience and expiry.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow!("invalid credential: {e}"))?;
        Ok(data.claims)
    }
}

impl CredentialIssuer for JwtIssuer {
    fn issue(&self, identity: &str) -> Result<String> {
        if identity.is_empty() {
            bail!("cannot issue a credential for an empty identity");
        }

        let now = Utc::now();
        let claims = Claims {
            sub: identity.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("failed to sign credential: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn issuer() -> JwtIssuer {
        JwtIssuer::new(SECRET, "faceid", "faceid-clients", Duration::minutes(60)).unwrap()
    }

    #[test]
    fn issued_token_validates_with_subject() {
        let issuer = issuer();
        let token = issuer.issue("a@x.com").unwrap();
        let claims = issuer.validate(&token).unwrap();
        assert_eq!(claims.sub, "a@x.com");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn tokens_are_unique_per_issue() {
        let issuer = issuer();
        let a = issuer.validate(&issuer.issue("a@x.com").unwrap()).unwrap();
        let b = issuer.validate(&issuer.issue("a@x.com").unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other =
            JwtIssuer::new(b"ffffffffffffffffffffffffffffffff", "faceid", "faceid-clients", Duration::minutes(5))
                .unwrap();
        let token = other.issue("a@x.com").unwrap();
        assert!(issuer().validate(&token).is_err());
    }

    #[test]
    fn short_secret_is_refused() {
        assert!(JwtIssuer::new(b"short", "faceid", "aud", Duration::minutes(5)).is_err());
    }

    #[test]
    fn empty_identity_is_refused() {
        assert!(issuer().issue("").is_err());
    }
}
