use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use concord_identity::derive_symmetric_key;
use concord_types::{b64, AgentId, ConcordError, Result};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// ChaCha20-Poly1305 nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Endpoints of a channel, from the creating side's point of view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub local: AgentId,
    pub remote: AgentId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    New,
    Established,
}

/// Ciphertext (with auth tag) and the nonce it was sealed under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    #[serde(with = "concord_types::b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "concord_types::b64")]
    pub nonce: Vec<u8>,
}

struct Session {
    remote_public: [u8; 32],
    key: Zeroizing<[u8; 32]>,
}

/// An end-to-end encrypted channel to one peer.
///
/// Each side generates an ephemeral X25519 key, publishes it, and feeds the
/// peer's key to [`Channel::set_remote_public_key`]. Both sides then hold the
/// same session key: `derive_symmetric_key(X25519(local, remote))`.
/// The session is set exactly once; `New -> Established` never reverses.
pub struct Channel {
    id: String,
    config: ChannelConfig,
    secret: x25519_dalek::StaticSecret,
    public: x25519_dalek::PublicKey,
    session: OnceLock<Session>,
}

impl Channel {
    /// Create a channel in the `New` state with a fresh ephemeral keypair.
    pub fn new(config: ChannelConfig) -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(rand::thread_rng());
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            secret,
            public,
            session: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn local(&self) -> &AgentId {
        &self.config.local
    }

    pub fn remote(&self) -> &AgentId {
        &self.config.remote
    }

    /// The local ephemeral X25519 public key, to be sent to the peer.
    pub fn local_public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// The peer key the session was derived from, once established.
    pub fn remote_public_key(&self) -> Option<[u8; 32]> {
        self.session.get().map(|s| s.remote_public)
    }

    /// Complete the key exchange with the peer's X25519 public key.
    pub fn set_remote_public_key(&self, peer_public: &[u8]) -> Result<()> {
        if self.session.get().is_some() {
            return Err(ConcordError::KeyExchange("channel already established".into()));
        }

        let peer_bytes: [u8; 32] = peer_public.try_into().map_err(|_| {
            warn!(channel = %self.id, len = peer_public.len(), "peer key has wrong length");
            ConcordError::KeyExchange("peer key must be 32 bytes".into())
        })?;
        let shared = self
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer_bytes));
        if !shared.was_contributory() {
            warn!(channel = %self.id, "peer key is low-order");
            return Err(ConcordError::KeyExchange("degenerate peer key".into()));
        }

        let session = Session {
            remote_public: peer_bytes,
            key: Zeroizing::new(derive_symmetric_key(shared.as_bytes())),
        };
        self.session
            .set(session)
            .map_err(|_| ConcordError::KeyExchange("channel already established".into()))?;

        info!(
            channel = %self.id,
            local = %self.config.local,
            remote = %self.config.remote,
            "channel established"
        );
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        self.session.get().is_some()
    }

    pub fn state(&self) -> ChannelState {
        if self.is_established() {
            ChannelState::Established
        } else {
            ChannelState::New
        }
    }

    /// Seal `plaintext` under the session key with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedMessage> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| ConcordError::Serialization(e.to_string()))?;

        Ok(SealedMessage {
            ciphertext,
            nonce: nonce_bytes.to_vec(),
        })
    }

    /// Open a message sealed by the peer's side of this channel.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;
        if nonce.len() != NONCE_LEN {
            return Err(ConcordError::Authentication);
        }
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                warn!(channel = %self.id, "message failed authentication");
                ConcordError::Authentication
            })
    }

    pub fn open(&self, message: &SealedMessage) -> Result<Vec<u8>> {
        self.decrypt(&message.ciphertext, &message.nonce)
    }

    /// Serialize `value` as JSON and seal it.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<SealedMessage> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| ConcordError::Serialization(e.to_string()))?,
        );
        self.encrypt(&plaintext)
    }

    /// Open a sealed message and parse it as JSON.
    pub fn decrypt_json<T: DeserializeOwned>(&self, message: &SealedMessage) -> Result<T> {
        let plaintext = Zeroizing::new(self.open(message)?);
        serde_json::from_slice(&plaintext).map_err(|e| ConcordError::Serialization(e.to_string()))
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305> {
        let session = self.session.get().ok_or(ConcordError::NotEstablished)?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&session.key[..])))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("local", &self.config.local)
            .field("remote", &self.config.remote)
            .field("local_public", &b64::encode(self.public.as_bytes()))
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Channel, Channel) {
        let a = Channel::new(ChannelConfig {
            local: "alice".into(),
            remote: "bob".into(),
        });
        let b = Channel::new(ChannelConfig {
            local: "bob".into(),
            remote: "alice".into(),
        });
        a.set_remote_public_key(&b.local_public_key()).unwrap();
        b.set_remote_public_key(&a.local_public_key()).unwrap();
        (a, b)
    }

    #[test]
    fn new_channel_is_not_established() {
        let ch = Channel::new(ChannelConfig {
            local: "alice".into(),
            remote: "bob".into(),
        });
        assert_eq!(ch.state(), ChannelState::New);
        assert!(!ch.is_established());
        assert!(ch.remote_public_key().is_none());
        assert!(matches!(ch.encrypt(b"x"), Err(ConcordError::NotEstablished)));
        assert!(matches!(
            ch.decrypt(b"x", &[0u8; NONCE_LEN]),
            Err(ConcordError::NotEstablished)
        ));
    }

    #[test]
    fn both_sides_talk() {
        let (a, b) = pair();
        assert_eq!(a.state(), ChannelState::Established);

        let msg = a.encrypt(b"dinner at 7?").unwrap();
        assert_eq!(b.decrypt(&msg.ciphertext, &msg.nonce).unwrap(), b"dinner at 7?");

        let reply = b.encrypt(b"make it 8").unwrap();
        assert_eq!(a.open(&reply).unwrap(), b"make it 8");
    }

    #[test]
    fn flipped_bytes_fail_authentication() {
        let (a, b) = pair();
        let msg = a.encrypt(b"integrity check").unwrap();

        for i in 0..msg.ciphertext.len() {
            let mut ct = msg.ciphertext.clone();
            ct[i] ^= 0x01;
            assert!(matches!(
                b.decrypt(&ct, &msg.nonce),
                Err(ConcordError::Authentication)
            ));
        }

        let mut nonce = msg.nonce.clone();
        nonce[0] ^= 0x01;
        assert!(matches!(
            b.decrypt(&msg.ciphertext, &nonce),
            Err(ConcordError::Authentication)
        ));

        assert!(matches!(
            b.decrypt(&msg.ciphertext, &msg.nonce[..8]),
            Err(ConcordError::Authentication)
        ));
    }

    #[test]
    fn third_party_cannot_read() {
        let (a, _b) = pair();
        let eve = Channel::new(ChannelConfig {
            local: "eve".into(),
            remote: "alice".into(),
        });
        eve.set_remote_public_key(&a.local_public_key()).unwrap();

        let msg = a.encrypt(b"for bob only").unwrap();
        assert!(eve.open(&msg).is_err());
    }

    #[test]
    fn nonces_are_fresh() {
        let (a, _b) = pair();
        let m1 = a.encrypt(b"same").unwrap();
        let m2 = a.encrypt(b"same").unwrap();
        assert_ne!(m1.nonce, m2.nonce);
        assert_ne!(m1.ciphertext, m2.ciphertext);
    }

    #[test]
    fn rejects_bad_peer_keys() {
        let ch = Channel::new(ChannelConfig {
            local: "alice".into(),
            remote: "bob".into(),
        });
        assert!(matches!(
            ch.set_remote_public_key(&[1u8; 31]),
            Err(ConcordError::KeyExchange(_))
        ));
        // The identity point yields an all-zero shared secret.
        assert!(matches!(
            ch.set_remote_public_key(&[0u8; 32]),
            Err(ConcordError::KeyExchange(_))
        ));
        assert!(!ch.is_established());
    }

    #[test]
    fn session_key_cannot_be_replaced() {
        let (a, b) = pair();
        let other = Channel::new(ChannelConfig {
            local: "carol".into(),
            remote: "alice".into(),
        });
        assert!(matches!(
            a.set_remote_public_key(&other.local_public_key()),
            Err(ConcordError::KeyExchange(_))
        ));
        assert_eq!(a.remote_public_key(), Some(b.local_public_key()));

        let msg = a.encrypt(b"still bob").unwrap();
        assert_eq!(b.open(&msg).unwrap(), b"still bob");
    }

    #[test]
    fn json_roundtrip_hides_plaintext() {
        let (a, b) = pair();
        let payload = serde_json::json!({"title": "anniversary dinner", "guests": 2});
        let sealed = a.encrypt_json(&payload).unwrap();

        let wire = serde_json::to_string(&sealed).unwrap();
        assert!(!wire.contains("anniversary"));

        let parsed: SealedMessage = serde_json::from_str(&wire).unwrap();
        let back: serde_json::Value = b.decrypt_json(&parsed).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn empty_plaintext() {
        let (a, b) = pair();
        let msg = a.encrypt(b"").unwrap();
        assert!(b.open(&msg).unwrap().is_empty());
    }
}
