use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT Claims structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Username
    pub uid: i32,    // User ID
    pub role: String,
    pub permissions: Vec<String>,
    pub token_type: TokenType,
    pub exp: usize, // Expiration timestamp
}

/// Identity carried by a token.
#[derive(Debug, Clone)]
pub struct Subject<'a> {
    pub user_id: i32,
    pub username: &'a str,
    pub role: &'a str,
    pub permissions: &'a [String],
}

/// Sign a token of the given type for a user.
pub fn sign(subject: &Subject<'_>, token_type: TokenType, config: &AuthConfig) -> Result<String> {
    let ttl = match token_type {
        TokenType::Access => Duration::minutes(config.access_token_ttl_minutes),
        TokenType::Refresh => Duration::days(config.refresh_token_ttl_days),
    };
    let expiration = Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| anyhow!("token expiry out of range"))?
        .timestamp();

    let claims = Claims {
        sub: subject.username.to_owned(),
        uid: subject.user_id,
        role: subject.role.to_owned(),
        permissions: subject.permissions.to_vec(),
        token_type,
        exp: usize::try_from(expiration)?,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify and decode a token, requiring the given type.
pub fn verify(token: &str, expected: TokenType, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    if token_data.claims.token_type != expected {
        return Err(anyhow!("unexpected token type"));
    }
    Ok(token_data.claims)
}
