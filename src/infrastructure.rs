//! Adapters for the outside world: the nostr-sdk relay client and the
//! NIP-11 information document fetch.

pub mod nip11;
pub mod nostr;

pub use nostr::NostrTransport;
