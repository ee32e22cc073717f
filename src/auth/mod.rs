mod error;
mod principal;
mod signing_key;
mod token;

pub use error::AuthError;
pub use principal::{AuthOutcome, Principal, VerifiedClaims};
pub use signing_key::{
    KeyRemediation, KeyWeakness, MIN_SECRET_LEN, SigningKey, SigningKeyError, generate_secret,
};
pub use token::{TokenClaims, TokenError, TokenKind, TokenService};
