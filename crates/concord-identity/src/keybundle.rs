use concord_types::{ConcordError, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use pqcrypto_mldsa::mldsa65;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::info;
use zeroize::Zeroizing;

/// ML-KEM-768 ciphertext length in bytes.
pub const KEM_CIPHERTEXT_LEN: usize = 1088;
/// Length of every derived symmetric key and KEM shared secret.
pub const SHARED_SECRET_LEN: usize = 32;

/// An agent's hybrid identity: Ed25519 + ML-DSA-65 signing, ML-KEM-768 encapsulation.
///
/// Not `Clone`. Private material only leaves through [`KeyBundle::seal`].
pub struct KeyBundle {
    ed25519: SigningKey,
    mldsa_public: mldsa65::PublicKey,
    mldsa_secret: mldsa65::SecretKey,
    mlkem_public: mlkem768::PublicKey,
    mlkem_secret: mlkem768::SecretKey,
}

/// Public half of a [`KeyBundle`], as embedded in agent cards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    #[serde(with = "concord_types::b64::array32")]
    pub ed25519: [u8; 32],
    #[serde(with = "concord_types::b64")]
    pub mldsa: Vec<u8>,
    #[serde(with = "concord_types::b64")]
    pub mlkem: Vec<u8>,
}

/// A classical and a post-quantum signature over the same bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridSignature {
    #[serde(with = "concord_types::b64")]
    pub ed25519: Vec<u8>,
    #[serde(with = "concord_types::b64")]
    pub mldsa: Vec<u8>,
}

impl KeyBundle {
    /// Generate fresh Ed25519, ML-DSA-65 and ML-KEM-768 keypairs.
    pub fn generate() -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| ConcordError::Generation(e.to_string()))?;
        let ed25519 = SigningKey::from_bytes(&seed);
        let (mldsa_public, mldsa_secret) = mldsa65::keypair();
        let (mlkem_public, mlkem_secret) = mlkem768::keypair();

        let bundle = Self {
            ed25519,
            mldsa_public,
            mldsa_secret,
            mlkem_public,
            mlkem_secret,
        };
        info!(fingerprint = %bundle.public_keys().fingerprint(), "generated key bundle");
        Ok(bundle)
    }

    /// Rebuild a bundle from raw key material, checking every length.
    pub(crate) fn from_parts(
        ed25519_seed: &[u8],
        mldsa_secret: &[u8],
        mlkem_secret: &[u8],
        public: &PublicKeys,
    ) -> Result<Self> {
        let seed: [u8; 32] = ed25519_seed.try_into().map_err(|_| ConcordError::Format)?;
        let ed25519 = SigningKey::from_bytes(&seed);
        if ed25519.verifying_key().to_bytes() != public.ed25519 {
            return Err(ConcordError::Format);
        }

        Ok(Self {
            ed25519,
            mldsa_public: mldsa65::PublicKey::from_bytes(&public.mldsa)
                .map_err(|_| ConcordError::Format)?,
            mldsa_secret: mldsa65::SecretKey::from_bytes(mldsa_secret)
                .map_err(|_| ConcordError::Format)?,
            mlkem_public: mlkem768::PublicKey::from_bytes(&public.mlkem)
                .map_err(|_| ConcordError::Format)?,
            mlkem_secret: mlkem768::SecretKey::from_bytes(mlkem_secret)
                .map_err(|_| ConcordError::Format)?,
        })
    }

    /// The public keys of this bundle.
    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            ed25519: self.ed25519.verifying_key().to_bytes(),
            mldsa: self.mldsa_public.as_bytes().to_vec(),
            mlkem: self.mlkem_public.as_bytes().to_vec(),
        }
    }

    /// Sign `data` independently under Ed25519 and ML-DSA-65.
    pub fn sign_hybrid(&self, data: &[u8]) -> HybridSignature {
        let ed = self.ed25519.sign(data);
        let pq = mldsa65::detached_sign(data, &self.mldsa_secret);
        HybridSignature {
            ed25519: ed.to_bytes().to_vec(),
            mldsa: pq.as_bytes().to_vec(),
        }
    }

    /// True only if both halves of `signature` verify against this bundle's keys.
    pub fn verify_hybrid(&self, data: &[u8], signature: &HybridSignature) -> bool {
        self.public_keys().verify_hybrid(data, signature)
    }

    /// Recover the secret produced by [`encapsulate`] for this bundle's KEM key.
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<[u8; SHARED_SECRET_LEN]> {
        let ct = mlkem768::Ciphertext::from_bytes(ciphertext)
            .map_err(|_| ConcordError::KeyExchange("malformed KEM ciphertext".into()))?;
        let shared = mlkem768::decapsulate(&ct, &self.mlkem_secret);
        Ok(derive_symmetric_key(shared.as_bytes()))
    }

    /// Length-prefixed private keys, in the fixed order Ed25519, ML-DSA, ML-KEM.
    pub(crate) fn private_key_frame(&self) -> Zeroizing<Vec<u8>> {
        let seed = Zeroizing::new(self.ed25519.to_bytes());
        let records: [&[u8]; 3] = [
            &seed[..],
            self.mldsa_secret.as_bytes(),
            self.mlkem_secret.as_bytes(),
        ];
        let total: usize = records.iter().map(|r| 4 + r.len()).sum();
        let mut frame = Zeroizing::new(Vec::with_capacity(total));
        for record in records {
            frame.extend_from_slice(&(record.len() as u32).to_be_bytes());
            frame.extend_from_slice(record);
        }
        frame
    }
}

impl fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBundle")
            .field("fingerprint", &self.public_keys().fingerprint())
            .finish_non_exhaustive()
    }
}

impl PublicKeys {
    /// True only if the Ed25519 AND the ML-DSA signature verify over `data`.
    pub fn verify_hybrid(&self, data: &[u8], signature: &HybridSignature) -> bool {
        let classical = VerifyingKey::from_bytes(&self.ed25519)
            .ok()
            .zip(ed25519_dalek::Signature::from_slice(&signature.ed25519).ok())
            .is_some_and(|(key, sig)| key.verify(data, &sig).is_ok());

        let post_quantum = mldsa65::PublicKey::from_bytes(&self.mldsa)
            .ok()
            .zip(mldsa65::DetachedSignature::from_bytes(&signature.mldsa).ok())
            .is_some_and(|(key, sig)| {
                mldsa65::verify_detached_signature(&sig, data, &key).is_ok()
            });

        classical && post_quantum
    }

    /// Short display identifier: hex of the first 16 bytes of SHA-256 over all keys.
    ///
    /// Not a trust anchor; use [`PublicKeys::verify_hybrid`] for that.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ed25519);
        hasher.update(&self.mldsa);
        hasher.update(&self.mlkem);
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }
}

/// Encapsulate to a peer's ML-KEM-768 public key.
///
/// Returns the 1088-byte ciphertext and the derived 32-byte shared secret.
pub fn encapsulate(peer_mlkem_public: &[u8]) -> Result<(Vec<u8>, [u8; SHARED_SECRET_LEN])> {
    let pk = mlkem768::PublicKey::from_bytes(peer_mlkem_public)
        .map_err(|_| ConcordError::KeyExchange("malformed KEM public key".into()))?;
    let (shared, ct) = mlkem768::encapsulate(&pk);
    Ok((ct.as_bytes().to_vec(), derive_symmetric_key(shared.as_bytes())))
}

/// Derive a 32-byte symmetric key from arbitrary seed material.
pub fn derive_symmetric_key(seed: &[u8]) -> [u8; SHARED_SECRET_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(b"concord-kdf-v1:");
    hasher.update(seed);
    hasher.finalize().into()
}
