//! Authenticated encryption for chunk payloads.
//!
//! Uses AES-256-GCM.
//! Key size: 32 bytes.  Nonce: 12 bytes (random, fresh per call).  Tag: 16 bytes.
//!
//! Token format (the only persisted form of chunk content):
//!   base64( nonce (12 bytes) | ciphertext + tag )
//!
//! Decryption authenticates before returning anything; a tampered token
//! or a wrong key yields [`RagError::Authentication`], never altered
//! plaintext. Key bytes are never logged or echoed into errors.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::path::Path;

use crate::config::EncryptionConfig;
use crate::error::{RagError, Result};

/// Nonce length prepended to every ciphertext.
pub const NONCE_LEN: usize = 12;

/// Key length required by AES-256-GCM.
pub const KEY_LEN: usize = 32;

pub struct EncryptionEngine {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionEngine").finish_non_exhaustive()
    }
}

impl EncryptionEngine {
    /// Build an engine from raw key bytes. Fails unless the key is
    /// exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(RagError::Config(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| RagError::Config("invalid key".into()))?;
        Ok(Self { cipher })
    }

    /// Encrypt plaintext into an opaque token, prepending a fresh
    /// random 12-byte nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| RagError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a token (nonce || ciphertext+tag, base64). Any malformed
    /// or tampered input fails authentication.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let data = BASE64
            .decode(token)
            .map_err(|_| RagError::Authentication)?;
        if data.len() < NONCE_LEN {
            return Err(RagError::Authentication);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| RagError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| RagError::Authentication)
    }

    /// Encrypt each text independently; one failure does not abort the
    /// rest. The caller decides whether a partial batch is usable.
    pub fn encrypt_batch(&self, texts: &[String]) -> Vec<Result<String>> {
        texts.iter().map(|t| self.encrypt(t)).collect()
    }

    /// Per-item decryption with the same semantics as [`encrypt_batch`].
    ///
    /// [`encrypt_batch`]: EncryptionEngine::encrypt_batch
    pub fn decrypt_batch(&self, tokens: &[String]) -> Vec<Result<String>> {
        tokens.iter().map(|t| self.decrypt(t)).collect()
    }
}

/// Generate a fresh random 32-byte key.
pub fn generate_key() -> [u8; KEY_LEN] {
    Aes256Gcm::generate_key(&mut OsRng).into()
}

/// Write raw key bytes to `path` with owner-only permissions.
///
/// Refuses to overwrite an existing key file unless `force` is set.
pub fn write_key_file(path: &Path, key: &[u8; KEY_LEN], force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(RagError::Config(format!(
            "key file already exists: {} (use --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, key)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Resolve the key from the configured source.
///
/// `key_env` takes precedence: the named variable must hold the key as
/// base64. Otherwise `key_file` must contain exactly 32 raw bytes.
/// Every failure mode is a fatal [`RagError::Config`].
pub fn load_key(config: &EncryptionConfig) -> Result<[u8; KEY_LEN]> {
    if let Some(var) = &config.key_env {
        let encoded = std::env::var(var).map_err(|_| {
            RagError::Config(format!("environment variable {} is not set", var))
        })?;
        let bytes = BASE64.decode(encoded.trim()).map_err(|_| {
            RagError::Config(format!("environment variable {} is not valid base64", var))
        })?;
        return key_from_bytes(&bytes, &format!("environment variable {}", var));
    }

    let path = &config.key_file;
    let bytes = std::fs::read(path).map_err(|_| {
        RagError::Config(format!(
            "cannot read key file {} (run `vrag setup-key` to create one)",
            path.display()
        ))
    })?;
    key_from_bytes(&bytes, &path.display().to_string())
}

fn key_from_bytes(bytes: &[u8], source: &str) -> Result<[u8; KEY_LEN]> {
    if bytes.len() != KEY_LEN {
        return Err(RagError::Config(format!(
            "key from {} must be {} bytes, got {}",
            source,
            KEY_LEN,
            bytes.len()
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(bytes);
    Ok(key)
}
