use chrono::{DateTime, Datelike, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Config;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password.as_bytes(), bcrypt::DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    bcrypt::verify(password.as_bytes(), hash)
}

/// What a bearer token is good for.  Session tokens come from the password
/// login flow; code-login tokens come from the parent-minted login-code
/// exchange and live for an hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenScope {
    Session,
    CodeLogin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub scope: TokenScope,
}

pub fn generate_token(
    user_id: &str,
    config: &Config,
) -> Result<String, jsonwebtoken::errors::Error> {
    issue(user_id, TokenScope::Session, config.jwt_expiration().as_secs() as i64, config)
}

pub fn generate_code_login_token(
    user_id: &str,
    config: &Config,
) -> Result<String, jsonwebtoken::errors::Error> {
    issue(
        user_id,
        TokenScope::CodeLogin,
        config.code_login_expiration().as_secs() as i64,
        config,
    )
}

fn issue(
    user_id: &str,
    scope: TokenScope,
    lifetime_secs: i64,
    config: &Config,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::seconds(lifetime_secs)).timestamp(),
        iat: now.timestamp(),
        scope,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Alphabet for friend/school/login codes.  Excludes 0, O, I and 1, which
/// read ambiguously when a kid copies a code off another screen.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn generate_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn is_valid_code(code: &str, len: usize) -> bool {
    code.len() == len && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Strips control characters and collapses runs of whitespace.  Applied to
/// every free-text field before validation.
pub fn sanitize_input(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !c.is_control())
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escapes HTML-significant characters so stored text is inert when the
/// clients render it.
pub fn sanitize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn calculate_age(date_of_birth: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    let mut age = now.year() - date_of_birth.year();
    if (now.month(), now.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age
}
