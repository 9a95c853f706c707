//! Primitive value types shared across the crate.
//!
//! All byte-array newtypes serialize as hex strings so they can travel in JSON
//! responses from the rollup provider and in storage snapshots.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

macro_rules! hex_bytes_type {
	($(#[$meta:meta])* $name:ident, $len:expr) => {
		$(#[$meta])*
		#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		pub struct $name(#[serde(with = "hex::serde")] pub [u8; $len]);

		impl $name {
			pub const SIZE: usize = $len;
			pub const ZERO: Self = Self([0u8; $len]);

			pub fn from_slice(bytes: &[u8]) -> Option<Self> {
				<[u8; $len]>::try_from(bytes).ok().map(Self)
			}

			pub fn is_zero(&self) -> bool {
				self.0.iter().all(|b| *b == 0)
			}

			pub fn as_bytes(&self) -> &[u8] {
				&self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::ZERO
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "0x{}", hex::encode(self.0))
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}(0x{})", stringify!($name), hex::encode(self.0))
			}
		}
	};
}

hex_bytes_type!(
	/// A 32-byte field element: Merkle nodes, note commitments, nullifiers.
	Hash,
	32
);

hex_bytes_type!(
	/// Public key identifying an account or a spending key.
	PublicKey,
	32
);

hex_bytes_type!(
	/// Account private key. Only sender-side accounts hold one.
	PrivateKey,
	32
);

hex_bytes_type!(
	/// Hash of a human readable alias.
	AliasHash,
	28
);

hex_bytes_type!(
	/// Transaction id: SHA-256 of an inner proof's encoding.
	TxId,
	32
);

impl TxId {
	pub fn from_proof_bytes(bytes: &[u8]) -> Self {
		Self(Sha256::digest(bytes).into())
	}
}

impl Hash {
	/// Big-endian u64 held in the low 8 bytes of a word. Returns `None` if the
	/// upper bytes are not zero.
	pub fn to_u64(&self) -> Option<u64> {
		if self.0[..24].iter().any(|b| *b != 0) {
			return None;
		}
		let mut buf = [0u8; 8];
		buf.copy_from_slice(&self.0[24..]);
		Some(u64::from_be_bytes(buf))
	}

	pub fn from_u64(value: u64) -> Self {
		let mut word = [0u8; 32];
		word[24..].copy_from_slice(&value.to_be_bytes());
		Self(word)
	}

	pub fn from_u128(value: u128) -> Self {
		let mut word = [0u8; 32];
		word[16..].copy_from_slice(&value.to_be_bytes());
		Self(word)
	}

	pub fn to_u128(&self) -> Option<u128> {
		if self.0[..16].iter().any(|b| *b != 0) {
			return None;
		}
		let mut buf = [0u8; 16];
		buf.copy_from_slice(&self.0[16..]);
		Some(u128::from_be_bytes(buf))
	}
}

/// Rollup id as carried in status markers. `-1` means nothing has been applied yet.
pub type RollupMarker = i64;

pub const UNSYNCED: RollupMarker = -1;
