//! Opaque cryptographic services
//!
//! The sync engine never implements proof systems or curve arithmetic itself.
//! It consumes them through the traits below: a two-to-one [`Hasher`] for the
//! Merkle trees, [`NoteAlgorithms`] for commitments, nullifiers and note
//! encryption, and a [`Prover`] producing proof bytes. The `dev` module ships
//! SHA-256 based implementations used by the binary in prover-less mode and
//! by tests.

mod dev;

pub use dev::{DevNoteAlgorithms, DevProver, Sha256Hasher};

use crate::rollup::InnerProofData;
use crate::types::{AliasHash, Hash, PrivateKey, PublicKey};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
	#[error("Proof construction failed: {0}")]
	ProofFailed(String),

	#[error("Note encryption failed: {0}")]
	EncryptionFailed(String),
}

/// Plaintext of a value note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNote {
	pub owner: PublicKey,
	pub value: u128,
	pub asset_id: u32,
	pub note_secret: Hash,
}

/// Two-to-one compression used for every Merkle node.
pub trait Hasher: Send + Sync {
	fn compress(&self, left: &Hash, right: &Hash) -> Hash;

	/// Root of a perfect subtree over `leaves`. The leaf count must be a power of two.
	fn hash_to_tree(&self, leaves: &[Hash]) -> Hash {
		let mut level = leaves.to_vec();
		while level.len() > 1 {
			level = level
				.chunks(2)
				.map(|pair| self.compress(&pair[0], pair.get(1).unwrap_or(&Hash::ZERO)))
				.collect();
		}
		level.first().copied().unwrap_or(Hash::ZERO)
	}
}

/// Commitment, nullifier and encryption primitives for notes.
pub trait NoteAlgorithms: Send + Sync {
	fn account_note_commitment(
		&self,
		alias_hash: &AliasHash,
		account_public_key: &PublicKey,
		spending_public_key: &PublicKey,
	) -> Hash;

	fn value_note_commitment(&self, note: &TreeNote) -> Hash;

	fn value_note_nullifier(&self, commitment: &Hash, private_key: &PrivateKey) -> Hash;

	fn derive_public_key(&self, private_key: &PrivateKey) -> PublicKey;

	fn encrypt_note(&self, note: &TreeNote) -> Result<Vec<u8>, CryptoError>;

	/// Returns the note only when `private_key` is able to open it.
	fn decrypt_note(&self, view_note: &[u8], private_key: &PrivateKey) -> Option<TreeNote>;
}

/// Produces the proof bytes for a fully populated inner proof.
#[async_trait::async_trait]
pub trait Prover: Send + Sync {
	async fn prove(&self, inner: &InnerProofData) -> Result<Vec<u8>, CryptoError>;
}
