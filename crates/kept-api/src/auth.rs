use std::time::Duration;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub session_id: Option<String>,
}

/// Verifies HS256 access tokens signed with the shared secret
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    issuer: Option<String>,
    clock_skew: Duration,
}

impl JwtVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = self.clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp"]);
        if let Some(issuer) = self.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        let decoded = decode::<AccessClaims>(token, &self.key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;
        validate_temporal_claims(&decoded.claims, self.clock_skew)?;

        let claims = decoded.claims;
        let user_id = claims
            .subject()
            .ok_or_else(|| AppError::unauthorized("Token subject is missing"))?;

        Ok(AuthenticatedUser {
            user_id,
            session_id: claims.session_id.or(claims.jti),
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: Option<Value>,
    user_id: Option<Value>,
    id: Option<Value>,
    exp: Option<i64>,
    iat: Option<i64>,
    nbf: Option<i64>,
    jti: Option<String>,
    session_id: Option<String>,
}

impl AccessClaims {
    /// `sub`, falling back to the `user_id` and `id` claims
    fn subject(&self) -> Option<String> {
        [&self.sub, &self.user_id, &self.id]
            .into_iter()
            .flatten()
            .find_map(claim_text)
    }
}

/// Accept string and integer ids; tokens from older issuers carry numeric ids
fn claim_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Number(number) if number.is_i64() || number.is_u64() => Some(number.to_string()),
        _ => None,
    }
}

fn validate_temporal_claims(claims: &AccessClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    if let Some(iat) = claims.iat {
        if iat > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token `iat` is in the future"));
        }
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::*;
    use crate::config::tests::TEST_SECRET;

    pub(crate) fn sign(claims: &Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap()
    }

    pub(crate) fn token_for(user_id: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        sign(&json!({ "sub": user_id, "iat": now, "exp": now + 3_600 }))
    }

    fn verifier(issuer: Option<&str>) -> JwtVerifier {
        JwtVerifier {
            key: DecodingKey::from_secret(TEST_SECRET.as_bytes()),
            issuer: issuer.map(str::to_string),
            clock_skew: Duration::from_secs(60),
        }
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn verifier_accepts_subject_and_legacy_user_id() {
        let user = verifier(None).verify_access_token(&token_for("user-1")).unwrap();
        assert_eq!(user.user_id, "user-1");

        let now = chrono::Utc::now().timestamp();
        let legacy = sign(&json!({ "user_id": 42, "exp": now + 60, "jti": "s-1" }));
        let user = verifier(None).verify_access_token(&legacy).unwrap();
        assert_eq!(user.user_id, "42");
        assert_eq!(user.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn verifier_rejects_bad_signature_and_missing_subject() {
        let now = chrono::Utc::now().timestamp();
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "sub": "user-1", "exp": now + 60 }),
            &EncodingKey::from_secret(b"some-other-secret-of-sufficient-length"),
        )
        .unwrap();
        assert!(verifier(None).verify_access_token(&forged).is_err());

        let anonymous = sign(&json!({ "exp": now + 60 }));
        let err = verifier(None).verify_access_token(&anonymous).unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn verifier_enforces_expiry_and_issuer() {
        let now = chrono::Utc::now().timestamp();
        let expired = sign(&json!({ "sub": "user-1", "exp": now - 3_600 }));
        assert!(verifier(None).verify_access_token(&expired).is_err());

        let no_exp = sign(&json!({ "sub": "user-1" }));
        assert!(verifier(None).verify_access_token(&no_exp).is_err());

        let foreign = sign(&json!({ "sub": "user-1", "exp": now + 60, "iss": "elsewhere" }));
        assert!(verifier(Some("kept")).verify_access_token(&foreign).is_err());

        let ours = sign(&json!({ "sub": "user-1", "exp": now + 60, "iss": "kept" }));
        assert!(verifier(Some("kept")).verify_access_token(&ours).is_ok());
    }

    #[test]
    fn temporal_claims_reject_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: Some(Value::String("user".to_string())),
            user_id: None,
            id: None,
            exp: Some(now + 300),
            iat: Some(now + 120),
            nbf: None,
            jti: None,
            session_id: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }
}
