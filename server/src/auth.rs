//! Bearer tokens: HS256 JWTs carrying the user id and role.

use chrono::{DateTime, Duration, Utc};
use entity::users;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn issue(&self, user: &users::Model) -> jsonwebtoken::errors::Result<IssuedToken> {
        self.issue_at(user, Utc::now())
    }

    fn issue_at(
        &self,
        user: &users::Model,
        now: DateTime<Utc>,
    ) -> jsonwebtoken::errors::Result<IssuedToken> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user.id,
            role: user.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Checks signature and expiry.
    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation).map(|data| data.claims)
    }
}

/// Extracts the token from an `Authorization: Bearer …` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::users::Role;

    fn user() -> users::Model {
        let now = Utc::now().into();
        users::Model {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            role: Role::Pm,
            created_at: now,
            updated_at: now,
        }
    }

    fn keys() -> TokenKeys {
        TokenKeys::new(&[7u8; 32], Duration::minutes(30))
    }

    #[test]
    fn issued_tokens_verify() {
        let user = user();
        let issued = keys().issue(&user).unwrap();
        let claims = keys().verify(&issued.token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, "PM");
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[test]
    fn expired_and_foreign_tokens_fail() {
        let user = user();
        let stale = keys()
            .issue_at(&user, Utc::now() - Duration::hours(2))
            .unwrap();
        assert!(keys().verify(&stale.token).is_err());

        let other = TokenKeys::new(&[9u8; 32], Duration::minutes(30));
        let forged = other.issue(&user).unwrap();
        assert!(keys().verify(&forged.token).is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer  xyz "), Some("xyz"));
        assert_eq!(bearer_token("Basic Zm9v"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("token"), None);
    }
}
