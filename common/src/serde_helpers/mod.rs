/// serde helper to encode a [`bitcoin::Transaction`] as consensus hex.
pub mod consensus_hex_tx;
/// serde helper for hex-encoded byte vectors.
pub mod hexstr;
