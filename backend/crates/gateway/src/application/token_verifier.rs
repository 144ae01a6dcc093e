//! Token Verifier
//!
//! Stateless verification of HMAC-signed JWTs (HS256/384/512) as issued by
//! the identity store. No I/O and no shared mutable state, so one verifier is
//! shared by every request without locking.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};

use crate::application::config::TokenConfig;
use crate::domain::identity::{Identity, UserId};
use crate::error::TokenError;

/// Value of the `type` claim on tokens accepted for API access
pub const ACCESS_TOKEN_TYPE: &str = "ACCESS";

const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Claims carried by identity store tokens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// JSON number or numeric string
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Claims of an access token valid for `ttl` from `issued_at`
    pub fn access(
        subject: impl Into<String>,
        user_id: Option<UserId>,
        roles: Vec<String>,
        issued_at: i64,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: Some(subject.into()),
            user_id: user_id.map(|id| serde_json::Value::from(id.value())),
            roles: Some(roles),
            token_type: Some(ACCESS_TOKEN_TYPE.to_string()),
            iat: Some(issued_at),
            exp: Some(issued_at.saturating_add(ttl.as_secs() as i64)),
        }
    }

    fn parsed_user_id(&self) -> Option<UserId> {
        match self.user_id.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().map(UserId::new),
            serde_json::Value::String(s) => s.parse().ok(),
            other => {
                tracing::debug!(user_id = %other, "Ignoring non-numeric userId claim");
                None
            }
        }
    }
}

/// Validation for `algorithm` that leaves time and registered claims to the caller
fn validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

fn token_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        JwtErrorKind::InvalidSignature => TokenError::BadSignature,
        JwtErrorKind::ExpiredSignature => TokenError::Expired,
        JwtErrorKind::InvalidAlgorithm | JwtErrorKind::InvalidAlgorithmName => {
            TokenError::UnsupportedAlgorithm(err.to_string())
        }
        _ => TokenError::Malformed(err.to_string()),
    }
}

/// Verifies bearer tokens against the shared secret
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    leeway: Duration,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("key", &"<redacted>")
            .field("leeway", &self.leeway)
            .finish()
    }
}

impl TokenVerifier {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            key: DecodingKey::from_secret(&config.secret),
            leeway: config.leeway,
        }
    }

    /// Verify `token` (without the `Bearer ` prefix) against the current time
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// Verify `token` as of `now` (seconds since the epoch).
    ///
    /// Expiry is checked before the signature, so an expired token reports
    /// [`TokenError::Expired`] whatever its signature.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Identity, TokenError> {
        let token = token.trim();
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        }

        let header = decode_header(token).map_err(token_error)?;
        if !HMAC_ALGORITHMS.contains(&header.alg) {
            return Err(TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        // Claims are read unverified first so expiry is judged against `now`
        let mut unverified = validation(header.alg);
        unverified.insecure_disable_signature_validation();
        let claims = decode::<Claims>(token, &self.key, &unverified)
            .map_err(token_error)?
            .claims;
        let exp = claims
            .exp
            .ok_or_else(|| TokenError::Malformed("missing exp claim".to_string()))?;
        if now >= exp.saturating_add(self.leeway.as_secs() as i64) {
            return Err(TokenError::Expired);
        }

        decode::<Claims>(token, &self.key, &validation(header.alg)).map_err(token_error)?;

        if let Some(token_type) = claims.token_type.as_deref() {
            if token_type != ACCESS_TOKEN_TYPE {
                return Err(TokenError::WrongTokenType(token_type.to_string()));
            }
        }

        let subject = match claims.sub.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => sub.to_string(),
            _ => return Err(TokenError::MissingSubject),
        };

        Ok(Identity::new(
            subject,
            claims.parsed_user_id(),
            claims.roles.clone().unwrap_or_default(),
        ))
    }
}

/// Signs tokens with the same layout the identity store uses.
///
/// For tests and local tooling; the gateway itself never issues tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
    algorithm: Algorithm,
}

impl TokenIssuer {
    pub fn new(secret: impl AsRef<[u8]>, algorithm: Algorithm) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_ref()),
            algorithm,
        }
    }

    pub fn hs256(secret: impl AsRef<[u8]>) -> Self {
        Self::new(secret, Algorithm::HS256)
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(self.algorithm), claims, &self.key)
            .map_err(|e| TokenError::Malformed(e.to_string()))
    }

    /// Access token for `subject` valid for `ttl` from now
    pub fn access_token(
        &self,
        subject: &str,
        user_id: Option<u64>,
        roles: &[&str],
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let claims = Claims::access(
            subject,
            user_id.map(UserId::new),
            roles.iter().map(|r| r.to_string()).collect(),
            chrono::Utc::now().timestamp(),
            ttl,
        );
        self.issue(&claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const NOW: i64 = 1_700_000_000;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(&TokenConfig {
            secret: SECRET.to_vec(),
            leeway: Duration::ZERO,
        })
    }

    fn claims(exp_in: i64) -> Claims {
        Claims {
            sub: Some("alice".to_string()),
            user_id: Some(serde_json::json!(42)),
            roles: Some(vec!["USER".to_string()]),
            token_type: Some(ACCESS_TOKEN_TYPE.to_string()),
            iat: Some(NOW - 10),
            exp: Some(NOW + exp_in),
        }
    }

    fn sign(claims: &Claims) -> String {
        TokenIssuer::hs256(SECRET).issue(claims).unwrap()
    }

    #[test]
    fn test_valid_token_round_trips_identity() {
        let identity = verifier().verify_at(&sign(&claims(300)), NOW).unwrap();
        assert_eq!(identity.subject(), "alice");
        assert_eq!(identity.user_id(), Some(UserId::new(42)));
        assert_eq!(identity.roles(), &["USER".to_string()]);
    }

    #[test]
    fn test_all_hmac_sizes_accepted() {
        for algorithm in [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512] {
            let token = TokenIssuer::new(SECRET, algorithm).issue(&claims(300)).unwrap();
            assert!(verifier().verify_at(&token, NOW).is_ok(), "{:?}", algorithm);
        }
    }

    #[test]
    fn test_numeric_string_user_id() {
        let mut c = claims(300);
        c.user_id = Some(serde_json::json!("7"));
        let identity = verifier().verify_at(&sign(&c), NOW).unwrap();
        assert_eq!(identity.user_id(), Some(UserId::new(7)));
        assert_eq!(identity.principal(), "7");
    }

    #[test]
    fn test_missing_or_odd_user_id_falls_back_to_subject() {
        let mut c = claims(300);
        c.user_id = None;
        let identity = verifier().verify_at(&sign(&c), NOW).unwrap();
        assert_eq!(identity.user_id(), None);
        assert_eq!(identity.principal(), "alice");

        c.user_id = Some(serde_json::json!("not-a-number"));
        assert_eq!(verifier().verify_at(&sign(&c), NOW).unwrap().user_id(), None);
    }

    #[test]
    fn test_expired_token() {
        let token = sign(&claims(-1));
        assert_eq!(verifier().verify_at(&token, NOW), Err(TokenError::Expired));

        // exp is exclusive
        let token = sign(&claims(0));
        assert_eq!(verifier().verify_at(&token, NOW), Err(TokenError::Expired));
    }

    #[test]
    fn test_expired_wins_over_bad_signature() {
        let token = TokenIssuer::hs256(b"some other secret")
            .issue(&claims(-60))
            .unwrap();
        assert_eq!(verifier().verify_at(&token, NOW), Err(TokenError::Expired));
    }

    #[test]
    fn test_leeway_extends_expiry() {
        let verifier = TokenVerifier::new(&TokenConfig {
            secret: SECRET.to_vec(),
            leeway: Duration::from_secs(30),
        });
        assert!(verifier.verify_at(&sign(&claims(-10)), NOW).is_ok());
        assert_eq!(
            verifier.verify_at(&sign(&claims(-30)), NOW),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_bad_signature() {
        let token = TokenIssuer::hs256(b"wrong").issue(&claims(300)).unwrap();
        assert_eq!(verifier().verify_at(&token, NOW), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_tampered_claims_fail_signature() {
        let token = sign(&claims(300));
        let parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims(300);
        forged.user_id = Some(serde_json::json!(1));
        let forged = TokenIssuer::hs256(b"attacker key").issue(&forged).unwrap();
        let forged_claims = forged.split('.').nth(1).unwrap();
        let tampered = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);

        assert_eq!(verifier().verify_at(&tampered, NOW), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.???.***"] {
            assert!(
                matches!(verifier().verify_at(token, NOW), Err(TokenError::Malformed(_))),
                "{token}"
            );
        }

        let mut c = claims(300);
        c.exp = None;
        assert!(matches!(
            verifier().verify_at(&sign(&c), NOW),
            Err(TokenError::Malformed(_))
        ));
    }

    /// Valid claims and signature segments under a foreign header
    fn with_header(header_b64: &str) -> String {
        let token = sign(&claims(300));
        let mut parts = token.splitn(2, '.');
        parts.next();
        format!("{}.{}", header_b64, parts.next().unwrap())
    }

    #[test]
    fn test_alg_none_rejected() {
        // {"alg":"none","typ":"JWT"}
        let token = with_header("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0");
        assert!(matches!(
            verifier().verify_at(&token, NOW),
            Err(TokenError::Malformed(_) | TokenError::UnsupportedAlgorithm(_))
        ));

        // Unsigned form with an empty signature segment
        let unsigned = format!("{}.", &token[..token.rfind('.').unwrap()]);
        assert!(verifier().verify_at(&unsigned, NOW).is_err());
    }

    #[test]
    fn test_asymmetric_alg_rejected() {
        // {"alg":"RS256","typ":"JWT"}
        let token = with_header("eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9");
        assert_eq!(
            verifier().verify_at(&token, NOW),
            Err(TokenError::UnsupportedAlgorithm("RS256".to_string()))
        );
    }

    #[test]
    fn test_alg_downgrade_between_hmac_sizes_fails_signature() {
        // HS512 signature relabelled as HS256
        let token = TokenIssuer::new(SECRET, Algorithm::HS512).issue(&claims(300)).unwrap();
        let hs256_header = sign(&claims(300)).split('.').next().unwrap().to_string();
        let relabelled = format!("{}{}", hs256_header, &token[token.find('.').unwrap()..]);
        assert_eq!(
            verifier().verify_at(&relabelled, NOW),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_missing_subject() {
        let mut c = claims(300);
        c.sub = None;
        assert_eq!(verifier().verify_at(&sign(&c), NOW), Err(TokenError::MissingSubject));

        c.sub = Some("  ".to_string());
        assert_eq!(verifier().verify_at(&sign(&c), NOW), Err(TokenError::MissingSubject));
    }

    #[test]
    fn test_refresh_token_rejected() {
        let mut c = claims(300);
        c.token_type = Some("REFRESH".to_string());
        assert_eq!(
            verifier().verify_at(&sign(&c), NOW),
            Err(TokenError::WrongTokenType("REFRESH".to_string()))
        );

        // Tokens without a type claim are accepted
        c.token_type = None;
        assert!(verifier().verify_at(&sign(&c), NOW).is_ok());
    }

    #[test]
    fn test_access_token_helper_verifies_now() {
        let token = TokenIssuer::hs256(SECRET)
            .access_token("bob", Some(9), &["ADMIN"], Duration::from_secs(60))
            .unwrap();
        let identity = verifier().verify(&token).unwrap();
        assert_eq!(identity.username(), "bob");
        assert_eq!(identity.user_id(), Some(UserId::new(9)));
        assert!(identity.has_role("ADMIN"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", verifier());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("0123456789"));
    }
}
