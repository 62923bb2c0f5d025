//! Session token verification.
//!
//! Tokens are `{user_id}:{hex(hmac_sha256(secret, user_id))}`. The MAC is
//! compared in constant time; hashing both sides first normalizes lengths.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use mnemon_domain::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

fn digest_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

pub struct AuthVerifier {
    secret: Vec<u8>,
}

impl AuthVerifier {
    /// Read the signing secret from the configured env var.
    pub fn from_env(env_var: &str) -> Result<Self> {
        let secret = std::env::var(env_var)
            .map_err(|_| Error::Config(format!("environment variable '{env_var}' not set")))?;
        Ok(Self {
            secret: secret.into_bytes(),
        })
    }

    #[cfg(test)]
    fn with_secret(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn signature_for(&self, user_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts any key length");
        mac.update(user_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Mint a token for a user (login tooling and tests).
    pub fn mint(&self, user_id: &str) -> String {
        format!("{user_id}:{}", self.signature_for(user_id))
    }

    /// Validate a token, returning the user id it names.
    pub fn verify(&self, token: &str) -> Result<String> {
        let (user_id, signature) = token
            .rsplit_once(':')
            .ok_or_else(|| Error::Auth("malformed token".into()))?;
        if user_id.is_empty() {
            return Err(Error::Auth("malformed token".into()));
        }
        let expected = self.signature_for(user_id);
        if digest_eq(expected.as_bytes(), signature.as_bytes()) {
            Ok(user_id.to_string())
        } else {
            Err(Error::Auth("invalid or expired session".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_verifies() {
        let auth = AuthVerifier::with_secret("test-secret");
        let token = auth.mint("taylor");
        assert_eq!(auth.verify(&token).unwrap(), "taylor");
    }

    #[test]
    fn tampered_token_rejected() {
        let auth = AuthVerifier::with_secret("test-secret");
        let token = auth.mint("taylor");
        let forged = token.replace("taylor", "admin");
        assert!(auth.verify(&forged).is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = AuthVerifier::with_secret("secret-a").mint("taylor");
        assert!(AuthVerifier::with_secret("secret-b").verify(&token).is_err());
    }

    #[test]
    fn malformed_tokens_rejected() {
        let auth = AuthVerifier::with_secret("test-secret");
        assert!(auth.verify("no-separator").is_err());
        assert!(auth.verify(":justsig").is_err());
        assert!(auth.verify("").is_err());
    }
}
