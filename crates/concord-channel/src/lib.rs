mod channel;
mod manager;

pub use channel::{Channel, ChannelConfig, ChannelState, SealedMessage, NONCE_LEN};
pub use manager::{ChannelInfo, ChannelManager};
