//! Reed-Solomon erasure coding and stripe arithmetic.
//!
//! This crate provides:
//! - [`ErasureCoder`] — a Vandermonde Reed-Solomon codec over GF(2⁸)
//!   with `encode`, `reconstruct` (any D of N shards) and `verify`
//!   (parity recomputation after reconstruction).
//! - [`stripe`] — block/shard length arithmetic shared by the write and
//!   read paths: shard lengths, block ranges for offset/length reads,
//!   and data-shard assembly.
//!
//! The codec holds only immutable parameters and is safe to share
//! across parallel encodes and decodes.

mod coder;
mod error;
pub mod stripe;

pub use coder::ErasureCoder;
pub use error::ErasureError;
