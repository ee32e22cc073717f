//! HMAC signing secret policy.
//!
//! The secret is checked once at startup. Production refuses to start with a
//! missing or weak secret; other modes repair it and log a warning so local
//! setups keep working.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, RngCore, distributions::Alphanumeric, rngs::OsRng};

use crate::config::DeploymentMode;

/// Minimum secret length, in characters.
pub const MIN_SECRET_LEN: usize = 64;

/// Length of an ascending or descending character run that marks a secret
/// as sequential (e.g. `abcdef`, `987654`).
const SEQUENTIAL_RUN_LEN: usize = 6;

const COMMON_WORDS: &[&str] = &[
    "secret", "password", "changeme", "default", "example", "test", "123456", "qwerty", "admin",
    "letmein",
];

/// Why a secret was judged unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyWeakness {
    Missing,
    TooShort { len: usize },
    RepeatedCharacter,
    Sequential,
    CommonWord(&'static str),
}

impl fmt::Display for KeyWeakness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyWeakness::Missing => write!(f, "no signing secret configured"),
            KeyWeakness::TooShort { len } => write!(
                f,
                "signing secret is {len} characters, at least {MIN_SECRET_LEN} are required"
            ),
            KeyWeakness::RepeatedCharacter => {
                write!(f, "signing secret repeats a single character")
            }
            KeyWeakness::Sequential => {
                write!(f, "signing secret contains a sequential character run")
            }
            KeyWeakness::CommonWord(word) => {
                write!(f, "signing secret contains the common word '{word}'")
            }
        }
    }
}

/// What was done to a configured secret outside production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRemediation {
    /// The secret was too short and was padded with random characters.
    Extended { original_len: usize },
    /// The secret was missing or trivially guessable and was replaced.
    Generated { reason: KeyWeakness },
}

#[derive(Debug, thiserror::Error)]
pub enum SigningKeyError {
    #[error(
        "refusing to start in production: {0}. Generate one with `tenantgate keygen` \
         and set auth.signing_secret"
    )]
    Weak(KeyWeakness),
}

/// The validated secret used for HMAC token signatures.
pub struct SigningKey {
    secret: String,
    remediation: Option<KeyRemediation>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("len", &self.secret.chars().count())
            .field("remediation", &self.remediation)
            .finish()
    }
}

impl SigningKey {
    /// Validate the configured secret for the given deployment mode.
    pub fn from_config(
        secret: Option<&str>,
        mode: DeploymentMode,
    ) -> Result<Self, SigningKeyError> {
        let weakness = match secret {
            None => Some(KeyWeakness::Missing),
            Some(s) if s.trim().is_empty() => Some(KeyWeakness::Missing),
            Some(s) => assess(s),
        };

        let Some(weakness) = weakness else {
            return Ok(Self {
                secret: secret.unwrap_or_default().to_string(),
                remediation: None,
            });
        };

        if mode.is_production() {
            tracing::error!(reason = %weakness, "Signing secret rejected");
            return Err(SigningKeyError::Weak(weakness));
        }

        let (secret, remediation) = match (weakness, secret) {
            (KeyWeakness::TooShort { len }, Some(s)) => (
                extend(s),
                KeyRemediation::Extended { original_len: len },
            ),
            (reason, _) => (generate_secret(), KeyRemediation::Generated { reason }),
        };

        match &remediation {
            KeyRemediation::Extended { original_len } => tracing::warn!(
                mode = mode.as_str(),
                original_len,
                "Signing secret is shorter than {MIN_SECRET_LEN} characters; padded with random \
                 characters. Tokens will not survive a restart. This is fatal in production."
            ),
            KeyRemediation::Generated { reason } => tracing::warn!(
                mode = mode.as_str(),
                reason = %reason,
                "Signing secret replaced with a generated one. Tokens will not survive a \
                 restart. This is fatal in production."
            ),
        }

        Ok(Self {
            secret,
            remediation: Some(remediation),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }

    /// The repair applied at startup, if any.
    pub fn remediation(&self) -> Option<&KeyRemediation> {
        self.remediation.as_ref()
    }
}

/// Generate a fresh secret: 64 random bytes, base64url without padding
/// (86 characters).
pub fn generate_secret() -> String {
    loop {
        let mut bytes = [0u8; 64];
        OsRng.fill_bytes(&mut bytes);
        let candidate = URL_SAFE_NO_PAD.encode(bytes);
        // Vanishingly rare, but a generated secret must pass its own policy
        if assess(&candidate).is_none() {
            return candidate;
        }
    }
}

/// Check a secret against the policy. `None` means acceptable.
pub fn assess(secret: &str) -> Option<KeyWeakness> {
    let chars: Vec<char> = secret.chars().collect();

    if let Some(first) = chars.first()
        && chars.iter().all(|c| c == first)
    {
        return Some(KeyWeakness::RepeatedCharacter);
    }

    if has_sequential_run(&chars) {
        return Some(KeyWeakness::Sequential);
    }

    let lowered = secret.to_lowercase();
    if let Some(word) = COMMON_WORDS.iter().copied().find(|w| lowered.contains(w)) {
        return Some(KeyWeakness::CommonWord(word));
    }

    if chars.len() < MIN_SECRET_LEN {
        return Some(KeyWeakness::TooShort { len: chars.len() });
    }

    None
}

fn has_sequential_run(chars: &[char]) -> bool {
    let mut ascending = 1;
    let mut descending = 1;
    for pair in chars.windows(2) {
        let (a, b) = (pair[0] as i64, pair[1] as i64);
        ascending = if b - a == 1 { ascending + 1 } else { 1 };
        descending = if a - b == 1 { descending + 1 } else { 1 };
        if ascending >= SEQUENTIAL_RUN_LEN || descending >= SEQUENTIAL_RUN_LEN {
            return true;
        }
    }
    false
}

fn extend(secret: &str) -> String {
    let missing = MIN_SECRET_LEN.saturating_sub(secret.chars().count());
    let padding: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(missing)
        .map(char::from)
        .collect();
    format!("{secret}{padding}")
}
