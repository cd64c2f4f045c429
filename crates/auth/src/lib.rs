//! `wallet-auth`: caller identity for the wallet core.
//!
//! Issues and verifies HS256 bearer tokens whose subject is an account id.
//! Decoupled from HTTP and storage: the signing key is handed in by the
//! process, and the transfer core only ever sees the verified `AccountId`.

pub mod bearer;
pub mod claims;
pub mod jwt;

pub use bearer::extract_bearer;
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{AuthError, Hs256JwtValidator, JwtValidator, authenticate};
