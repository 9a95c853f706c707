use crate::types::Hash;

/// Errors raised while decoding rollup, offchain or genesis buffers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
	#[error("Unexpected end of buffer: needed {needed} bytes at offset {offset}, {available} available")]
	UnexpectedEnd {
		offset: usize,
		needed: usize,
		available: usize,
	},

	#[error("Value at offset {offset} does not fit in {target}")]
	Overflow { offset: usize, target: &'static str },

	#[error("Unknown proof id {0}")]
	UnknownProofId(u64),

	#[error("Trailing bytes after decoding: {0}")]
	TrailingBytes(usize),

	#[error("Invalid rollup: {0}")]
	InvalidRollup(String),
}

/// Cursor over a byte buffer reading the big-endian layouts used on the wire.
pub(crate) struct Reader<'a> {
	buf: &'a [u8],
	offset: usize,
}

impl<'a> Reader<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Self { buf, offset: 0 }
	}

	pub fn offset(&self) -> usize {
		self.offset
	}

	pub fn remaining(&self) -> usize {
		self.buf.len() - self.offset
	}

	pub fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
		if self.remaining() < len {
			return Err(DecodeError::UnexpectedEnd {
				offset: self.offset,
				needed: len,
				available: self.remaining(),
			});
		}
		let slice = &self.buf[self.offset..self.offset + len];
		self.offset += len;
		Ok(slice)
	}

	pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
		let mut out = [0u8; N];
		out.copy_from_slice(self.take(N)?);
		Ok(out)
	}

	pub fn word(&mut self) -> Result<Hash, DecodeError> {
		Ok(Hash(self.array::<32>()?))
	}

	pub fn word_u64(&mut self) -> Result<u64, DecodeError> {
		let offset = self.offset;
		self.word()?.to_u64().ok_or(DecodeError::Overflow { offset, target: "u64" })
	}

	pub fn word_u32(&mut self) -> Result<u32, DecodeError> {
		let offset = self.offset;
		let value = self.word_u64()?;
		u32::try_from(value).map_err(|_| DecodeError::Overflow { offset, target: "u32" })
	}

	pub fn word_u128(&mut self) -> Result<u128, DecodeError> {
		let offset = self.offset;
		self.word()?.to_u128().ok_or(DecodeError::Overflow { offset, target: "u128" })
	}

	pub fn u32(&mut self) -> Result<u32, DecodeError> {
		Ok(u32::from_be_bytes(self.array::<4>()?))
	}

	/// A `u32` length prefix followed by that many bytes.
	pub fn var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
		let len = self.u32()? as usize;
		Ok(self.take(len)?.to_vec())
	}

	pub fn finish(self) -> Result<(), DecodeError> {
		match self.remaining() {
			0 => Ok(()),
			n => Err(DecodeError::TrailingBytes(n)),
		}
	}
}

/// Append-only writer producing the same layouts as [`Reader`] consumes.
#[derive(Default)]
pub(crate) struct Writer {
	buf: Vec<u8>,
}

impl Writer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
		self.buf.extend_from_slice(bytes);
		self
	}

	pub fn word(&mut self, word: &Hash) -> &mut Self {
		self.bytes(&word.0)
	}

	pub fn word_u64(&mut self, value: u64) -> &mut Self {
		self.word(&Hash::from_u64(value))
	}

	pub fn word_u128(&mut self, value: u128) -> &mut Self {
		self.word(&Hash::from_u128(value))
	}

	pub fn u32(&mut self, value: u32) -> &mut Self {
		self.bytes(&value.to_be_bytes())
	}

	pub fn var_bytes(&mut self, bytes: &[u8]) -> &mut Self {
		self.u32(bytes.len() as u32);
		self.bytes(bytes)
	}

	pub fn into_inner(self) -> Vec<u8> {
		self.buf
	}
}
