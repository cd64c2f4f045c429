//! HS256 token issuing and verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use wallet_core::AccountId;

use crate::bearer::extract_bearer;
use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed bearer token")]
    MissingBearer,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Turns a raw token into verified claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, AuthError>;
}

/// HS256 issuer and validator over an injected shared secret.
pub struct Hs256JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl core::fmt::Debug for Hs256JwtValidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256JwtValidator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        // Expiry lives in our own claims and is checked by `validate_claims`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a token for `sub`, valid from `now` for `ttl`.
    pub fn issue(&self, sub: AccountId, now: DateTime<Utc>, ttl: Duration) -> Result<String, AuthError> {
        let claims = JwtClaims::new(sub, now, ttl);
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, AuthError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                AuthError::InvalidToken(e.to_string())
            })?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

/// Resolve an `Authorization` header value to the calling account.
pub fn authenticate(
    validator: &dyn JwtValidator,
    authorization: &str,
    now: DateTime<Utc>,
) -> Result<AccountId, AuthError> {
    let token = extract_bearer(authorization)?;
    Ok(validator.validate(token, now)?.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips_to_its_subject() {
        let validator = Hs256JwtValidator::new("test-secret");
        let account = AccountId::new();
        let now = Utc::now();

        let token = validator.issue(account, now, Duration::minutes(10)).unwrap();
        let caller = authenticate(&validator, &format!("Bearer {token}"), now).unwrap();

        assert_eq!(caller, account);
    }

    #[test]
    fn token_signed_with_another_key_is_rejected() {
        let now = Utc::now();
        let token = Hs256JwtValidator::new("other-secret")
            .issue(AccountId::new(), now, Duration::minutes(10))
            .unwrap();

        let err = Hs256JwtValidator::new("test-secret")
            .validate(&token, now)
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = Hs256JwtValidator::new("test-secret");
        let issued = Utc::now() - Duration::hours(2);
        let token = validator.issue(AccountId::new(), issued, Duration::hours(1)).unwrap();

        assert_eq!(
            validator.validate(&token, Utc::now()),
            Err(AuthError::Claims(TokenValidationError::Expired))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        let validator = Hs256JwtValidator::new("test-secret");
        assert!(matches!(
            validator.validate("not-a-jwt", Utc::now()),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let validator = Hs256JwtValidator::new("super-secret-value");
        assert!(!format!("{validator:?}").contains("super-secret-value"));
    }
}
