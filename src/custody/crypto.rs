//! Key generation and envelope encryption
//!
//! Private keys are encrypted with AES-256-GCM under the configured envelope
//! key. The random 96-bit nonce is prepended to the ciphertext and the whole
//! blob is hex encoded, so a record is self-contained.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;
use sha3::{Digest, Keccak256};

use crate::error::{Error, Result};
use crate::ledger::Address;

pub const ENCRYPTION_VERSION: &str = "aes256_gcm_v1";

/// Encrypts and decrypts private key material with the envelope key
pub struct EnvelopeCipher {
    key: [u8; 32],
    kms_key_id: Option<String>,
}

impl EnvelopeCipher {
    /// Build from a hex-encoded 32-byte key.
    ///
    /// There is deliberately no fallback: callers must have validated that a
    /// key is configured before getting here.
    pub fn from_hex(hex_key: &str, kms_key_id: Option<String>) -> Result<Self> {
        let clean = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = hex::decode(clean)
            .map_err(|_| Error::Config("envelope key is not valid hex".to_string()))?;

        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config("envelope key must be exactly 32 bytes".to_string()))?;

        Ok(Self { key, kms_key_id })
    }

    pub fn kms_key_id(&self) -> Option<&str> {
        self.kms_key_id.as_deref()
    }

    /// Encrypt a private key (hex string, `0x` prefix stripped first)
    pub fn encrypt(&self, private_key: &str) -> Result<String> {
        let plaintext = private_key.strip_prefix("0x").unwrap_or(private_key);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| Error::Custody("invalid envelope key length".to_string()))?;

        let nonce_bytes: [u8; 12] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Custody("private key encryption failed".to_string()))?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(hex::encode(blob))
    }

    /// Decrypt an encrypted private key blob back to a `0x`-prefixed hex key
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let blob = hex::decode(encrypted)
            .map_err(|_| Error::WalletDecryption("encrypted key is not valid hex".to_string()))?;

        if blob.len() < 12 {
            return Err(Error::WalletDecryption(
                "encrypted key blob too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| Error::Custody("invalid envelope key length".to_string()))?;

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
            Error::WalletDecryption("ciphertext does not match the configured envelope key".to_string())
        })?;

        let key = String::from_utf8(plaintext)
            .map_err(|_| Error::WalletDecryption("decrypted key is not valid utf-8".to_string()))?;

        if key.starts_with("0x") {
            Ok(key)
        } else {
            Ok(format!("0x{}", key))
        }
    }
}

/// Freshly generated signing keypair
pub struct GeneratedKeypair {
    pub address: Address,
    /// Hex-encoded secret key, `0x` prefixed. Exists only transiently.
    pub private_key: String,
}

/// Generate a secp256k1 keypair and derive its ledger address
pub fn generate_keypair() -> Result<GeneratedKeypair> {
    let secp = secp256k1::Secp256k1::new();
    let mut rng = rand::thread_rng();

    let secret_key = secp256k1::SecretKey::new(&mut rng);
    let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);

    // Address = last 20 bytes of keccak256(uncompressed pubkey minus prefix)
    let uncompressed = public_key.serialize_uncompressed();
    let mut hasher = Keccak256::new();
    hasher.update(&uncompressed[1..]);
    let digest = hasher.finalize();

    let address = Address::parse(&format!("0x{}", hex::encode(&digest[12..])))?;
    let private_key = format!("0x{}", hex::encode(secret_key.secret_bytes()));

    Ok(GeneratedKeypair {
        address,
        private_key,
    })
}
