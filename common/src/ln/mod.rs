//! Bitcoin / Lightning newtypes shared across the node core.

/// `tokens` / `mtokens` conversions.
pub mod amount;
/// `ChannelId`, the `block x tx x output` short channel id.
pub mod channel;
/// `PaymentHash` and `PaymentSecret`.
pub mod hashes;
/// `NodePk`.
pub mod node;
/// `TlvRecord`, custom onion records attached to a final hop.
pub mod tlv;
