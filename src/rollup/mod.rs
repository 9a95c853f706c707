//! Rollup block decoding
//!
//! Pure transformation from the opaque byte buffers published by the rollup
//! provider into structured rollups: public inputs, inner proofs and the
//! offchain metadata of every non-padding transaction.

mod block_context;
pub(crate) mod codec;
mod offchain;
mod proof_data;

pub use block_context::{BlockContext, BlockTransaction};
pub use codec::DecodeError;
pub use offchain::*;
pub use proof_data::*;
