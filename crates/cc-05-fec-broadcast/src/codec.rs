//! # Codec Contract
//!
//! An encoder turns `data_size` bytes into symbols of `symbol_size`; a
//! decoder reconstructs once it holds enough of them. Backing codecs plug in
//! behind these traits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FecError {
    #[error("invalid codec parameters: {0}")]
    InvalidParams(String),

    #[error("symbol id {0} out of range")]
    BadSymbolId(u32),

    #[error("symbol size mismatch")]
    BadSymbolSize,

    #[error("reconstruction failed: {0}")]
    DecodeFailed(String),
}

/// Shared shape of one coded payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FecParams {
    /// Number of source symbols the payload splits into.
    pub symbols_count: u32,
    pub symbol_size: usize,
    pub data_size: usize,
}

impl FecParams {
    pub fn validate(&self) -> Result<(), FecError> {
        if self.symbol_size == 0 {
            return Err(FecError::InvalidParams("zero symbol size".into()));
        }
        if self.symbols_count == 0 {
            return Err(FecError::InvalidParams("zero symbol count".into()));
        }
        let capacity = self.symbol_size as u64 * u64::from(self.symbols_count);
        if (self.data_size as u64) > capacity {
            return Err(FecError::InvalidParams("data exceeds symbol capacity".into()));
        }
        Ok(())
    }
}

/// One coded symbol.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Symbol {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Produces symbols for one payload.
pub trait FecEncoder {
    fn params(&self) -> FecParams;

    /// Precompute repair symbols. Idempotent; called before the first
    /// non-source symbol is requested.
    fn prepare_more_symbols(&mut self) -> Result<(), FecError>;

    /// Write symbol `id`. Source symbols are available immediately; repair
    /// symbols after [`prepare_more_symbols`](Self::prepare_more_symbols).
    fn gen_symbol(&mut self, id: u32) -> Result<Symbol, FecError>;
}

/// Decoder progress.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DecodeOutcome {
    Ready(Vec<u8>),
    NeedMore,
}

/// Consumes symbols for one payload.
pub trait FecDecoder {
    fn params(&self) -> FecParams;

    /// Absorb a symbol. Duplicates and out-of-range ids are ignored after
    /// reporting.
    fn add_symbol(&mut self, symbol: Symbol) -> Result<(), FecError>;

    /// Cheap prediction of whether [`try_decode`](Self::try_decode) can
    /// succeed.
    fn may_try_decode(&self) -> bool;

    /// Attempt reconstruction. `strict` additionally verifies repair
    /// consistency over the reconstructed data.
    fn try_decode(&mut self, strict: bool) -> Result<DecodeOutcome, FecError>;
}
