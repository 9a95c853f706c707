use super::{CryptoError, Hasher, NoteAlgorithms, Prover, TreeNote};
use crate::rollup::InnerProofData;
use crate::types::{AliasHash, Hash, PrivateKey, PublicKey};

use sha2::{Digest, Sha256};

fn digest(parts: &[&[u8]]) -> Hash {
	let mut hasher = Sha256::new();
	for part in parts {
		hasher.update(part);
	}
	Hash(hasher.finalize().into())
}

/// SHA-256 of the concatenated children.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
	fn compress(&self, left: &Hash, right: &Hash) -> Hash {
		digest(&[left.as_bytes(), right.as_bytes()])
	}
}

/// Plaintext note scheme for development networks. A view note is the note's
/// own encoding and only opens for the key whose public key owns it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevNoteAlgorithms;

const NOTE_ENCODING_LEN: usize = 32 + 16 + 4 + 32;

impl NoteAlgorithms for DevNoteAlgorithms {
	fn account_note_commitment(
		&self,
		alias_hash: &AliasHash,
		account_public_key: &PublicKey,
		spending_public_key: &PublicKey,
	) -> Hash {
		digest(&[
			b"account-note",
			alias_hash.as_bytes(),
			account_public_key.as_bytes(),
			spending_public_key.as_bytes(),
		])
	}

	fn value_note_commitment(&self, note: &TreeNote) -> Hash {
		digest(&[
			b"value-note",
			note.owner.as_bytes(),
			&note.value.to_be_bytes(),
			&note.asset_id.to_be_bytes(),
			note.note_secret.as_bytes(),
		])
	}

	fn value_note_nullifier(&self, commitment: &Hash, private_key: &PrivateKey) -> Hash {
		digest(&[b"nullifier", commitment.as_bytes(), private_key.as_bytes()])
	}

	fn derive_public_key(&self, private_key: &PrivateKey) -> PublicKey {
		PublicKey(digest(&[b"public-key", private_key.as_bytes()]).0)
	}

	fn encrypt_note(&self, note: &TreeNote) -> Result<Vec<u8>, CryptoError> {
		let mut buf = Vec::with_capacity(NOTE_ENCODING_LEN);
		buf.extend_from_slice(note.owner.as_bytes());
		buf.extend_from_slice(&note.value.to_be_bytes());
		buf.extend_from_slice(&note.asset_id.to_be_bytes());
		buf.extend_from_slice(note.note_secret.as_bytes());
		Ok(buf)
	}

	fn decrypt_note(&self, view_note: &[u8], private_key: &PrivateKey) -> Option<TreeNote> {
		if view_note.len() != NOTE_ENCODING_LEN {
			return None;
		}
		let owner = PublicKey::from_slice(&view_note[..32])?;
		if owner != self.derive_public_key(private_key) {
			return None;
		}
		let value = u128::from_be_bytes(view_note[32..48].try_into().ok()?);
		let asset_id = u32::from_be_bytes(view_note[48..52].try_into().ok()?);
		let note_secret = Hash::from_slice(&view_note[52..])?;
		Some(TreeNote {
			owner,
			value,
			asset_id,
			note_secret,
		})
	}
}

/// Prover for prover-less rollup providers: the proof is the public input encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevProver;

#[async_trait::async_trait]
impl Prover for DevProver {
	async fn prove(&self, inner: &InnerProofData) -> Result<Vec<u8>, CryptoError> {
		Ok(inner.to_bytes())
	}
}
