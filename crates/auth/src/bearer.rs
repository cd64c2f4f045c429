use crate::jwt::AuthError;

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MissingBearer)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingBearer);
    }
    Ok(token)
}
