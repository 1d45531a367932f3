use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use concord_types::{b64, ConcordError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::keybundle::{KeyBundle, PublicKeys};

/// KDF tag written into every sealed bundle.
pub const KDF_ALGORITHM: &str = "argon2id";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// At-rest form of a [`KeyBundle`]: public keys in the clear, private keys
/// sealed under a passphrase-derived key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedKeyBundle {
    pub ed25519_public: String,
    pub mldsa_public: String,
    pub mlkem_public: String,
    /// Base64 of nonce (12 bytes) + ChaCha20-Poly1305 ciphertext + tag.
    pub encrypted_private_keys: String,
    pub salt: String,
    pub algorithm: String,
}

impl KeyBundle {
    /// Seal this bundle under `passphrase` with Argon2id and ChaCha20-Poly1305.
    pub fn seal(&self, passphrase: &str) -> Result<SerializedKeyBundle> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce_bytes);

        let key = passphrase_key(passphrase, &salt)
            .map_err(|e| ConcordError::Serialization(e.to_string()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let frame = self.private_key_frame();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), frame.as_slice())
            .map_err(|e| ConcordError::Serialization(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        let public = self.public_keys();
        Ok(SerializedKeyBundle {
            ed25519_public: b64::encode(public.ed25519),
            mldsa_public: b64::encode(&public.mldsa),
            mlkem_public: b64::encode(&public.mlkem),
            encrypted_private_keys: b64::encode(combined),
            salt: b64::encode(salt),
            algorithm: KDF_ALGORITHM.to_string(),
        })
    }
}

impl SerializedKeyBundle {
    /// Recover the [`KeyBundle`] sealed under `passphrase`.
    ///
    /// Malformed input yields [`ConcordError::Format`]; a failed AEAD tag
    /// (wrong passphrase or tampering) yields [`ConcordError::Decryption`].
    pub fn open(&self, passphrase: &str) -> Result<KeyBundle> {
        if self.algorithm != KDF_ALGORITHM {
            return Err(ConcordError::Format);
        }

        let public = PublicKeys {
            ed25519: decode(&self.ed25519_public)?
                .try_into()
                .map_err(|_| ConcordError::Format)?,
            mldsa: decode(&self.mldsa_public)?,
            mlkem: decode(&self.mlkem_public)?,
        };
        let salt = decode(&self.salt)?;
        let sealed = decode(&self.encrypted_private_keys)?;
        if sealed.len() < NONCE_LEN {
            return Err(ConcordError::Format);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let key = passphrase_key(passphrase, &salt).map_err(|_| ConcordError::Format)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let frame = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| {
                    warn!(fingerprint = %public.fingerprint(), "key bundle failed authentication");
                    ConcordError::Decryption
                })?,
        );

        let mut rest = frame.as_slice();
        let ed25519_seed = next_record(&mut rest)?;
        let mldsa_secret = next_record(&mut rest)?;
        let mlkem_secret = next_record(&mut rest)?;
        if !rest.is_empty() {
            return Err(ConcordError::Format);
        }

        let bundle = KeyBundle::from_parts(ed25519_seed, mldsa_secret, mlkem_secret, &public)?;
        debug!(fingerprint = %public.fingerprint(), "opened key bundle");
        Ok(bundle)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConcordError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| ConcordError::Format)
    }
}

fn decode(s: &str) -> Result<Vec<u8>> {
    b64::decode(s).map_err(|_| ConcordError::Format)
}

fn passphrase_key(
    passphrase: &str,
    salt: &[u8],
) -> std::result::Result<Zeroizing<[u8; 32]>, argon2::Error> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default().hash_password_into(passphrase.as_bytes(), salt, &mut key[..])?;
    Ok(key)
}

/// Split one `(u32 BE length, bytes)` record off the front of `buf`.
fn next_record<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    if buf.len() < 4 {
        return Err(ConcordError::Format);
    }
    let (len_bytes, rest) = buf.split_at(4);
    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if len > rest.len() {
        return Err(ConcordError::Format);
    }
    let (record, rest) = rest.split_at(len);
    *buf = rest;
    Ok(record)
}
