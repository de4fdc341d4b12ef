//! Source identity of code cells.
//!
//! A kernel stores each cell it is asked to debug in a temporary file whose
//! name is derived from a hash of the cell's code. Computing the same name
//! on the client side lets breakpoints be addressed to a cell without a
//! `dumpCell` round trip.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unsupported hash method `{0}`")]
    UnsupportedMethod(String),
    #[error("source identity has not been negotiated with the kernel")]
    NotNegotiated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    Murmur2,
}

impl HashMethod {
    pub fn hash(&self, code: &str, seed: u32) -> u32 {
        match self {
            HashMethod::Murmur2 => murmur2(code.as_bytes(), seed),
        }
    }
}

impl FromStr for HashMethod {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Murmur2" => Ok(HashMethod::Murmur2),
            other => Err(HashError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashMethod::Murmur2 => f.write_str("Murmur2"),
        }
    }
}

/// Parameters the kernel reports for naming cell files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub method: HashMethod,
    pub seed: u32,
    pub prefix: String,
    pub suffix: String,
}

impl SourceIdentity {
    pub fn new(
        method: &str,
        seed: u32,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Result<Self, HashError> {
        Ok(Self {
            method: method.parse()?,
            seed,
            prefix: prefix.into(),
            suffix: suffix.into(),
        })
    }

    /// Kernel side path of the file holding `code`.
    pub fn code_id(&self, code: &str) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            self.method.hash(code, self.seed),
            self.suffix
        )
    }
}

/// 32 bit MurmurHash2.
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= u32::from(tail[2]) << 16;
        }
        if tail.len() >= 2 {
            h ^= u32::from(tail[1]) << 8;
        }
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}
