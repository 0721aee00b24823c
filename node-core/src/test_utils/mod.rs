use bitcoin::secp256k1::SecretKey;
use common::ln::node::NodePk;

/// Closing transactions, HTLC scripts, and their spends.
pub mod fixtures;
/// An in-memory [`NodeClient`](crate::client::NodeClient).
pub mod mock;

pub use mock::MockNode;

/// A deterministic node key. `byte` must be nonzero.
pub fn node_pk(byte: u8) -> NodePk {
    let secret_key = SecretKey::from_slice(&[byte; 32])
        .expect("Nonzero bytes are a valid secret key");
    NodePk::from_secret_key(&secret_key)
}
