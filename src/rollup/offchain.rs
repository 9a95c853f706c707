//! Offchain transaction data travelling next to each non-padding inner proof.

use super::codec::{DecodeError, Reader, Writer};
use super::proof_data::ProofId;
use crate::types::{AliasHash, Hash, PublicKey};

/// Offchain data of a deposit, withdraw or send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffchainJoinSplitData {
	/// Encrypted output notes, one per note commitment.
	pub view_notes: [Vec<u8>; 2],
	pub tx_ref_no: u32,
}

impl OffchainJoinSplitData {
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut reader = Reader::new(buf);
		let view_note1 = reader.var_bytes()?;
		let view_note2 = reader.var_bytes()?;
		let tx_ref_no = reader.u32()?;
		reader.finish()?;
		Ok(Self {
			view_notes: [view_note1, view_note2],
			tx_ref_no,
		})
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut writer = Writer::new();
		writer
			.var_bytes(&self.view_notes[0])
			.var_bytes(&self.view_notes[1])
			.u32(self.tx_ref_no);
		writer.into_inner()
	}
}

/// Offchain data of an account registration or migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffchainAccountData {
	pub account_public_key: PublicKey,
	pub alias_hash: AliasHash,
	pub spending_public_key1: PublicKey,
	pub spending_public_key2: PublicKey,
	pub tx_ref_no: u32,
}

impl OffchainAccountData {
	pub const SIZE: usize = PublicKey::SIZE * 3 + AliasHash::SIZE + 4;

	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut reader = Reader::new(buf);
		let account_public_key = PublicKey(reader.array()?);
		let alias_hash = AliasHash(reader.array()?);
		let spending_public_key1 = PublicKey(reader.array()?);
		let spending_public_key2 = PublicKey(reader.array()?);
		let tx_ref_no = reader.u32()?;
		reader.finish()?;
		Ok(Self {
			account_public_key,
			alias_hash,
			spending_public_key1,
			spending_public_key2,
			tx_ref_no,
		})
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut writer = Writer::new();
		writer
			.bytes(self.account_public_key.as_bytes())
			.bytes(self.alias_hash.as_bytes())
			.bytes(self.spending_public_key1.as_bytes())
			.bytes(self.spending_public_key2.as_bytes())
			.u32(self.tx_ref_no);
		writer.into_inner()
	}
}

/// Offchain data of a defi deposit. The view note covers the change output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffchainDefiDepositData {
	pub bridge_call_data: Hash,
	pub deposit_value: u128,
	pub view_note: Vec<u8>,
	pub tx_ref_no: u32,
}

impl OffchainDefiDepositData {
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut reader = Reader::new(buf);
		let bridge_call_data = reader.word()?;
		let deposit_value = reader.word_u128()?;
		let view_note = reader.var_bytes()?;
		let tx_ref_no = reader.u32()?;
		reader.finish()?;
		Ok(Self {
			bridge_call_data,
			deposit_value,
			view_note,
			tx_ref_no,
		})
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut writer = Writer::new();
		writer
			.word(&self.bridge_call_data)
			.word_u128(self.deposit_value)
			.var_bytes(&self.view_note)
			.u32(self.tx_ref_no);
		writer.into_inner()
	}
}

/// Offchain data decoded according to the proof type of its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffchainTxData {
	JoinSplit(OffchainJoinSplitData),
	Account(OffchainAccountData),
	DefiDeposit(OffchainDefiDepositData),
	DefiClaim,
}

impl OffchainTxData {
	pub fn decode(proof_id: ProofId, buf: &[u8]) -> Result<Self, DecodeError> {
		match proof_id {
			ProofId::Deposit | ProofId::Withdraw | ProofId::Send => {
				Ok(Self::JoinSplit(OffchainJoinSplitData::decode(buf)?))
			}
			ProofId::Account => Ok(Self::Account(OffchainAccountData::decode(buf)?)),
			ProofId::DefiDeposit => Ok(Self::DefiDeposit(OffchainDefiDepositData::decode(buf)?)),
			ProofId::DefiClaim => Ok(Self::DefiClaim),
			ProofId::Padding => Err(DecodeError::InvalidRollup(
				"padding proofs carry no offchain data".to_string(),
			)),
		}
	}

	/// Encrypted notes paired with the index of the commitment they open.
	pub fn view_notes(&self) -> Vec<(usize, &[u8])> {
		match self {
			Self::JoinSplit(data) => vec![(0, &data.view_notes[0][..]), (1, &data.view_notes[1][..])],
			Self::DefiDeposit(data) => vec![(1, &data.view_note[..])],
			Self::Account(_) | Self::DefiClaim => Vec::new(),
		}
	}
}
