//! RSA PKCS#1 v1.5 payload encryption.
//!
//! The agent encrypts with the public key taken from the server certificate,
//! the server decrypts with the matching private key. Payloads larger than one
//! block are cut into `key_size - 11` byte chunks, each sealed on its own; the
//! ciphertext is the concatenation of `key_size` byte blocks.

use crate::error::CipherError;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;

/// PKCS#1 v1.5 padding overhead per block.
const PADDING_OVERHEAD: usize = 11;

pub type Result<T> = std::result::Result<T, CipherError>;

#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Reads a PEM file holding either an X.509 certificate or a public key.
    pub fn load(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = if pem.contains("BEGIN CERTIFICATE") {
            let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
                .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
            let cert = block
                .parse_x509()
                .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
            RsaPublicKey::from_public_key_der(cert.public_key().raw)
                .map_err(|e| CipherError::InvalidKey(e.to_string()))?
        } else if pem.contains("BEGIN RSA PUBLIC KEY") {
            RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| CipherError::InvalidKey(e.to_string()))?
        } else {
            RsaPublicKey::from_public_key_pem(pem)
                .map_err(|e| CipherError::InvalidKey(e.to_string()))?
        };
        Ok(Self { key })
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        let chunk = block - PADDING_OVERHEAD;
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(data.len().div_ceil(chunk).max(1) * block);
        if data.is_empty() {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, data)?);
            return Ok(out);
        }
        for piece in data.chunks(chunk) {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, piece)?);
        }
        Ok(out)
    }
}

pub struct Decryptor {
    key: RsaPrivateKey,
}

impl std::fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decryptor")
            .field("bits", &(self.key.size() * 8))
            .finish()
    }
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Accepts PKCS#1 (`RSA PRIVATE KEY`) and, failing that, PKCS#8 PEM.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = match RsaPrivateKey::from_pkcs1_pem(pem) {
            Ok(key) => key,
            Err(pkcs1_err) => RsaPrivateKey::from_pkcs8_pem(pem)
                .map_err(|_| CipherError::InvalidKey(pkcs1_err.to_string()))?,
        };
        Ok(Self { key })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        if data.is_empty() || data.len() % block != 0 {
            return Err(CipherError::Misaligned {
                len: data.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(data.len());
        for piece in data.chunks(block) {
            out.extend(self.key.decrypt(Pkcs1v15Encrypt, piece)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use rsa::pkcs8::EncodePublicKey;
    use std::sync::OnceLock;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key generation")
        })
    }

    #[test]
    fn single_block_round_trip() {
        let dec = Decryptor::new(test_key().clone());
        let enc = Encryptor::new(dec.public_key());

        let sealed = enc.encrypt(b"short body").unwrap();
        assert_eq!(sealed.len(), 128);
        assert_eq!(dec.decrypt(&sealed).unwrap(), b"short body");
    }

    #[test]
    fn long_payload_is_chunked() {
        let dec = Decryptor::new(test_key().clone());
        let enc = Encryptor::new(dec.public_key());

        let body = vec![b'x'; 1000];
        let sealed = enc.encrypt(&body).unwrap();
        // 117 plaintext bytes per 128 byte block
        assert_eq!(sealed.len(), 9 * 128);
        assert_eq!(dec.decrypt(&sealed).unwrap(), body);
    }

    #[test]
    fn keys_load_from_pem() {
        let private_pem = test_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        let public_pem = test_key()
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let dec = Decryptor::from_pem(&private_pem).unwrap();
        let enc = Encryptor::from_pem(&public_pem).unwrap();
        let sealed = enc.encrypt(b"{}").unwrap();
        assert_eq!(dec.decrypt(&sealed).unwrap(), b"{}");
    }

    #[test]
    fn garbage_is_rejected() {
        let dec = Decryptor::new(test_key().clone());
        assert!(matches!(
            dec.decrypt(&[1, 2, 3]),
            Err(CipherError::Misaligned { len: 3, block: 128 })
        ));
        assert!(dec.decrypt(&[7u8; 128]).is_err());
        assert!(Decryptor::from_pem("-----BEGIN NOTHING-----").is_err());
        assert!(Encryptor::from_pem("not a key").is_err());
    }
}
