//! Supabase JWT authentication
//!
//! The frontend authenticates against Supabase; this API only verifies
//! the tokens Supabase issued. HS256 with the shared project secret,
//! audience `authenticated`.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// Claims carried in a Supabase-issued token
#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseClaims {
    /// User ID as a string, parsed to UUID after validation
    pub sub: String,
    pub email: Option<String>,
    pub aud: Option<String>,
    pub exp: i64,
}

/// Authenticated user attached to the request as an extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// Validates Supabase tokens
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
}

impl JwtValidator {
    pub fn new(supabase_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(supabase_secret.as_bytes()),
        }
    }

    /// Validate a Supabase-issued JWT. Explicit algorithm and audience
    /// validation; no fallback on audience mismatch.
    pub fn validate(&self, token: &str) -> Result<AuthUser, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance
        validation.set_audience(&["authenticated"]);

        let claims = decode::<SupabaseClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::warn!(error = %e, "JWT validation failed");
                ApiError::InvalidToken
            })?;

        let user_id = claims.sub.parse::<Uuid>().map_err(|_| {
            tracing::warn!("JWT sub claim is not a UUID");
            ApiError::InvalidToken
        })?;

        Ok(AuthUser {
            user_id,
            email: claims.email,
        })
    }
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Middleware that requires a valid Supabase token and attaches the
/// resulting [`AuthUser`] as a request extension
pub async fn require_auth(
    State(validator): State<JwtValidator>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return ApiError::Unauthorized.into_response();
    };

    match validator.validate(token) {
        Ok(auth_user) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "test-supabase-secret-at-least-32-characters";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        email: Option<String>,
        aud: String,
        exp: i64,
    }

    fn make_token(sub: &str, aud: &str, exp_offset: i64) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            email: Some("test@example.com".to_string()),
            aud: aud.to_string(),
            exp: time::OffsetDateTime::now_utc().unix_timestamp() + exp_offset,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_auth_user() {
        let validator = JwtValidator::new(SECRET);
        let user_id = Uuid::new_v4();
        let token = make_token(&user_id.to_string(), "authenticated", 3600);

        let auth_user = validator.validate(&token).unwrap();
        assert_eq!(auth_user.user_id, user_id);
        assert_eq!(auth_user.email.as_deref(), Some("test@example.com"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let validator = JwtValidator::new(SECRET);
        let token = make_token(&Uuid::new_v4().to_string(), "authenticated", -3600);
        assert!(matches!(
            validator.validate(&token),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let validator = JwtValidator::new(SECRET);
        let token = make_token(&Uuid::new_v4().to_string(), "anon", 3600);
        assert!(matches!(
            validator.validate(&token),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let validator = JwtValidator::new(SECRET);
        let token = make_token("not-a-uuid", "authenticated", 3600);
        assert!(matches!(
            validator.validate(&token),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let validator = JwtValidator::new("a-different-secret-also-32-characters!!");
        let token = make_token(&Uuid::new_v4().to_string(), "authenticated", 3600);
        assert!(validator.validate(&token).is_err());
    }
}
