mod canonical;
mod card;
mod keybundle;
mod pairing;
mod relationship;
mod sealed;

pub use canonical::canonicalize;
pub use card::{AgentCard, CARD_PAYLOAD_VERSION};
pub use keybundle::{
    derive_symmetric_key, encapsulate, HybridSignature, KeyBundle, PublicKeys, KEM_CIPHERTEXT_LEN,
    SHARED_SECRET_LEN,
};
pub use pairing::{PairingRequest, PAIRING_PAYLOAD_VERSION};
pub use relationship::{Capability, Permission, PermissionLevel, Relationship, RelationshipType};
pub use sealed::{SerializedKeyBundle, KDF_ALGORITHM};
