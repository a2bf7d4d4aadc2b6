use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::config::DEFAULT_LOGIN_URL;
use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the acting user.
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

fn secret() -> Result<String, JwtError> {
    env::var("JWT_SECRET").map_err(|_| JwtError::from(ErrorKind::InvalidKeyFormat))
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, JwtError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
///
/// Requests without a bearer token are answered with a redirect to the login
/// page; a token that fails verification is a 401.
pub struct Auth(pub Claims);

impl Auth {
    pub fn username(&self) -> &str {
        &self.0.sub
    }

    pub fn is_admin(&self) -> bool {
        self.0.roles.contains(&Role::Admin)
    }
}

fn login_redirect(req: &HttpRequest) -> ApiError {
    let login_url = req
        .app_data::<web::Data<AppState>>()
        .map(|s| s.config.login_url.clone())
        .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string());
    let next = match req.query_string() {
        "" => req.path().to_string(),
        q => format!("{}?{}", req.path(), q),
    };
    ApiError::LoginRequired { location: format!("{login_url}?next={}", urlencoding::encode(&next)) }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(e) => {
                    tracing::debug!("rejected bearer token: {e}");
                    ready(Err(ApiError::Unauthorized))
                }
            };
        }
        ready(Err(login_redirect(req)))
    }
}

/// Helper macro for role-guarding handlers.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $role)) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}

/// Create a JWT for a user, valid for 24 hours.
pub fn create_jwt(username: &str, roles: Vec<Role>) -> Result<String, JwtError> {
    let secret = secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;

    let claims = Claims {
        sub: username.to_string(),
        exp: expiration,
        roles,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
