//! # Reed-Solomon Backing Codec
//!
//! Systematic code: symbols `0..symbols_count` are the payload split into
//! equal shards; symbols `symbols_count..2*symbols_count` are parity. A
//! receiver holding any `symbols_count` distinct symbols reconstructs.

use crate::codec::{DecodeOutcome, FecDecoder, FecEncoder, FecError, FecParams, Symbol};
use reed_solomon_erasure::galois_8::ReedSolomon;

/// GF(2^8) bounds the total shard count.
const MAX_TOTAL_SHARDS: u32 = 256;

fn make_codec(params: &FecParams) -> Result<ReedSolomon, FecError> {
    params.validate()?;
    if params.symbols_count * 2 > MAX_TOTAL_SHARDS {
        return Err(FecError::InvalidParams(format!(
            "too many shards: {}",
            params.symbols_count * 2
        )));
    }
    ReedSolomon::new(params.symbols_count as usize, params.symbols_count as usize)
        .map_err(|e| FecError::InvalidParams(e.to_string()))
}

/// Split `data` into `symbols_count` zero-padded shards of `symbol_size`.
fn shard_data(params: &FecParams, data: &[u8]) -> Vec<Vec<u8>> {
    let mut shards = Vec::with_capacity(params.symbols_count as usize);
    for i in 0..params.symbols_count as usize {
        let start = i * params.symbol_size;
        let end = ((i + 1) * params.symbol_size).min(data.len());
        let mut shard = if start < data.len() {
            data[start..end].to_vec()
        } else {
            Vec::new()
        };
        shard.resize(params.symbol_size, 0);
        shards.push(shard);
    }
    shards
}

/// Encoder over one payload.
pub struct RsEncoder {
    params: FecParams,
    shards: Vec<Vec<u8>>,
    parity_ready: bool,
}

impl RsEncoder {
    /// Choose parameters for `data` with symbols no larger than
    /// `max_symbol_size`.
    pub fn with_max_symbol_size(data: &[u8], max_symbol_size: usize) -> Result<Self, FecError> {
        if data.is_empty() {
            return Err(FecError::InvalidParams("empty payload".into()));
        }
        if max_symbol_size == 0 {
            return Err(FecError::InvalidParams("zero symbol size".into()));
        }
        // Keep 2 * symbols_count within the field bound.
        let min_count = data.len().div_ceil(max_symbol_size);
        let symbols_count = min_count.clamp(1, (MAX_TOTAL_SHARDS / 2) as usize);
        let symbol_size = data.len().div_ceil(symbols_count).max(1);
        let params = FecParams {
            symbols_count: symbols_count as u32,
            symbol_size,
            data_size: data.len(),
        };
        Self::new(params, data)
    }

    pub fn new(params: FecParams, data: &[u8]) -> Result<Self, FecError> {
        make_codec(&params)?;
        if data.len() != params.data_size {
            return Err(FecError::InvalidParams("data size mismatch".into()));
        }
        Ok(Self {
            shards: shard_data(&params, data),
            params,
            parity_ready: false,
        })
    }
}

impl FecEncoder for RsEncoder {
    fn params(&self) -> FecParams {
        self.params
    }

    fn prepare_more_symbols(&mut self) -> Result<(), FecError> {
        if self.parity_ready {
            return Ok(());
        }
        let codec = make_codec(&self.params)?;
        self.shards.resize(
            self.params.symbols_count as usize * 2,
            vec![0u8; self.params.symbol_size],
        );
        codec
            .encode(&mut self.shards)
            .map_err(|e| FecError::DecodeFailed(e.to_string()))?;
        self.parity_ready = true;
        Ok(())
    }

    fn gen_symbol(&mut self, id: u32) -> Result<Symbol, FecError> {
        if id >= self.params.symbols_count * 2 {
            return Err(FecError::BadSymbolId(id));
        }
        if id >= self.params.symbols_count {
            self.prepare_more_symbols()?;
        }
        Ok(Symbol {
            id,
            data: self.shards[id as usize].clone(),
        })
    }
}

/// Decoder over one payload.
pub struct RsDecoder {
    params: FecParams,
    shards: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl RsDecoder {
    pub fn new(params: FecParams) -> Result<Self, FecError> {
        make_codec(&params)?;
        Ok(Self {
            shards: vec![None; params.symbols_count as usize * 2],
            params,
            received: 0,
        })
    }
}

impl FecDecoder for RsDecoder {
    fn params(&self) -> FecParams {
        self.params
    }

    fn add_symbol(&mut self, symbol: Symbol) -> Result<(), FecError> {
        let idx = symbol.id as usize;
        if idx >= self.shards.len() {
            return Err(FecError::BadSymbolId(symbol.id));
        }
        if symbol.data.len() != self.params.symbol_size {
            return Err(FecError::BadSymbolSize);
        }
        if self.shards[idx].is_none() {
            self.shards[idx] = Some(symbol.data);
            self.received += 1;
        }
        Ok(())
    }

    fn may_try_decode(&self) -> bool {
        self.received >= self.params.symbols_count as usize
    }

    fn try_decode(&mut self, strict: bool) -> Result<DecodeOutcome, FecError> {
        if !self.may_try_decode() {
            return Ok(DecodeOutcome::NeedMore);
        }
        let codec = make_codec(&self.params)?;
        let mut shards = self.shards.clone();
        codec
            .reconstruct(&mut shards)
            .map_err(|e| FecError::DecodeFailed(e.to_string()))?;

        let full: Vec<Vec<u8>> = shards.into_iter().flatten().collect();
        if strict {
            let ok = codec
                .verify(&full)
                .map_err(|e| FecError::DecodeFailed(e.to_string()))?;
            if !ok {
                return Err(FecError::DecodeFailed("parity verification failed".into()));
            }
        }
        let mut data: Vec<u8> = full
            .into_iter()
            .take(self.params.symbols_count as usize)
            .flatten()
            .collect();
        data.truncate(self.params.data_size);
        Ok(DecodeOutcome::Ready(data))
    }
}
