use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use serde::{Deserialize, Serialize};

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// Encrypted OAuth token material as stored on a connector account row.
/// Both tokens are sealed under the same IV, stored alongside them;
/// ciphertexts are base64, the IV is hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedTokens {
    pub access: String,
    pub refresh: Option<String>,
    pub iv: String,
}

#[derive(Debug, Clone)]
pub struct DecryptedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Seals and opens connector OAuth tokens with AES-256-GCM. The key is
/// supplied by the process assembling the engine; the engine itself only
/// ever decrypts.
pub struct TokenVault {
    cipher: Aes256Gcm,
}

impl TokenVault {
    pub fn new(key: &[u8; KEY_LENGTH]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key is valid for AES-256");
        Self { cipher }
    }

    /// Build a vault from a base64-encoded 256-bit key, the format used for
    /// the `token_encryption_key` configuration value.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("Encryption key is not valid base64: {}", e))?;
        if key.len() != KEY_LENGTH {
            return Err(anyhow::anyhow!(
                "Encryption key must be {} bytes ({} bits) when base64 decoded",
                KEY_LENGTH,
                KEY_LENGTH * 8
            ));
        }
        let mut buf = [0u8; KEY_LENGTH];
        buf.copy_from_slice(&key);
        Ok(Self::new(&buf))
    }

    /// Encrypt an access token and optional refresh token under one fresh IV.
    pub fn encrypt_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<EncryptedTokens> {
        let nonce_bytes: [u8; NONCE_LENGTH] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let access = self
            .cipher
            .encrypt(nonce, access_token.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let refresh = match refresh_token {
            Some(token) => Some(
                self.cipher
                    .encrypt(nonce, token.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?,
            ),
            None => None,
        };

        Ok(EncryptedTokens {
            access: base64::engine::general_purpose::STANDARD.encode(&access),
            refresh: refresh.map(|c| base64::engine::general_purpose::STANDARD.encode(&c)),
            iv: hex::encode(nonce_bytes),
        })
    }

    pub fn decrypt_tokens(&self, tokens: &EncryptedTokens) -> Result<DecryptedTokens> {
        let nonce_bytes = hex::decode(&tokens.iv)
            .map_err(|e| anyhow::anyhow!("Token IV is not valid hex: {}", e))?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(anyhow::anyhow!(
                "Token IV must be {} bytes, got {}",
                NONCE_LENGTH,
                nonce_bytes.len()
            ));
        }

        let access_token = self.open(&nonce_bytes, &tokens.access)?;
        let refresh_token = match &tokens.refresh {
            Some(ciphertext) => Some(self.open(&nonce_bytes, ciphertext)?),
            None => None,
        };

        Ok(DecryptedTokens {
            access_token,
            refresh_token,
        })
    }

    fn open(&self, nonce_bytes: &[u8], encoded: &str) -> Result<String> {
        let nonce = Nonce::from_slice(nonce_bytes);
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;
        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> TokenVault {
        TokenVault::new(&[7u8; 32])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = test_vault();
        let sealed = vault
            .encrypt_tokens("ya29.access", Some("1//refresh"))
            .unwrap();
        assert_ne!(sealed.access, "ya29.access");

        let opened = vault.decrypt_tokens(&sealed).unwrap();
        assert_eq!(opened.access_token, "ya29.access");
        assert_eq!(opened.refresh_token.as_deref(), Some("1//refresh"));
    }

    #[test]
    fn missing_refresh_token_stays_absent() {
        let vault = test_vault();
        let sealed = vault.encrypt_tokens("access-only", None).unwrap();
        assert!(sealed.refresh.is_none());
        let opened = vault.decrypt_tokens(&sealed).unwrap();
        assert!(opened.refresh_token.is_none());
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let vault = test_vault();
        let a = vault.encrypt_tokens("same", None).unwrap();
        let b = vault.encrypt_tokens("same", None).unwrap();
        assert_ne!(a.iv, b.iv, "each record gets its own IV");
        assert_ne!(a.access, b.access);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = test_vault().encrypt_tokens("secret", None).unwrap();
        let other = TokenVault::new(&[9u8; 32]);
        assert!(other.decrypt_tokens(&sealed).is_err());
    }

    #[test]
    fn rejects_malformed_iv() {
        let vault = test_vault();
        let mut sealed = vault.encrypt_tokens("secret", None).unwrap();
        sealed.iv = "zz-not-hex".to_string();
        assert!(vault.decrypt_tokens(&sealed).is_err());
        sealed.iv = hex::encode([0u8; 4]);
        assert!(vault.decrypt_tokens(&sealed).is_err());
    }

    #[test]
    fn base64_key_must_be_256_bits() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        assert!(TokenVault::from_base64_key(&short).is_err());
        let full = base64::engine::general_purpose::STANDARD.encode([0u8; 32]);
        assert!(TokenVault::from_base64_key(&full).is_ok());
    }
}
