use crate::error::IndexError;
use crate::traits::VectorIndex;
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"TVIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 16;
const DIGEST_LEN: usize = 32;

/// Exact (brute force) index ranking by squared Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Serializes to `magic | version | dimension | count | build id |
    /// f32 data | sha256`, all integers little endian.
    pub fn to_bytes(&self, build_id: &[u8; 16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4 + DIGEST_LEN);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(build_id);
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let digest = Sha256::digest(&bytes);
        bytes.extend_from_slice(&digest);
        bytes
    }

    /// Inverse of [`FlatL2Index::to_bytes`]; returns the index and its build id.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, [u8; 16]), String> {
        if bytes.len() < HEADER_LEN + DIGEST_LEN {
            return Err(format!("file too short ({} bytes)", bytes.len()));
        }

        let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        if Sha256::digest(body).as_slice() != digest {
            return Err("checksum mismatch".to_string());
        }

        if &body[0..4] != MAGIC {
            return Err("bad magic".to_string());
        }

        let version = u32::from_le_bytes(fixed(&body[4..8]));
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {version}"));
        }

        let dimension = u32::from_le_bytes(fixed(&body[8..12])) as usize;
        let count = u64::from_le_bytes(fixed(&body[12..20])) as usize;
        let build_id: [u8; 16] = fixed(&body[20..36]);

        let payload = &body[HEADER_LEN..];
        let expected = count
            .checked_mul(dimension)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| "vector count overflows".to_string())?;
        if payload.len() != expected {
            return Err(format!(
                "expected {expected} bytes of vectors, found {}",
                payload.len()
            ));
        }

        let data = payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok((Self { dimension, data }, build_id))
    }
}

fn fixed<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let diff = a - b;
            diff * diff
        })
        .sum()
}

impl VectorIndex for FlatL2Index {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Err(IndexError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }

        let mut scored = self
            .data
            .chunks_exact(self.dimension.max(1))
            .enumerate()
            .map(|(position, vector)| (position, squared_l2(query, vector)))
            .collect::<Vec<_>>();

        // ties keep insertion order
        scored.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(&right.0)));
        scored.truncate(top_k);
        Ok(scored)
    }
}
