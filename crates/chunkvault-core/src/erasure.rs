//! Reed-Solomon Erasure Coding
//!
//! Cold streams trade read fan-out for storage: instead of R full replicas,
//! each chunk is split into K data shards plus M parity shards, one shard
//! per node, and any K of the N = K+M shards reconstruct the original bytes.
//!
//! ## Encoding
//!
//! The payload is padded with zeros up to `K * shard_size`, split into K
//! equal data shards, and M parity shards are computed over them. Because
//! padding is not self-describing, reconstruction takes the original length
//! and truncates the concatenated data shards back to it; callers get the
//! length from the chunk's catalog entry.
//!
//! ## Defaults
//!
//! K = 3, M = 2: five ~700 KiB fragments for a 2 MiB chunk, overhead
//! N/K ~ 1.67x versus 3x for triple replication.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{CoreError, Result};

/// Default number of data shards.
pub const DEFAULT_DATA_SHARDS: usize = 3;

/// Default number of parity shards.
pub const DEFAULT_PARITY_SHARDS: usize = 2;

/// Reed-Solomon codec over byte payloads.
#[derive(Debug, Clone)]
pub struct ErasureCodec {
    data_shards: usize,
    parity_shards: usize,
}

impl Default for ErasureCodec {
    fn default() -> Self {
        Self {
            data_shards: DEFAULT_DATA_SHARDS,
            parity_shards: DEFAULT_PARITY_SHARDS,
        }
    }
}

impl ErasureCodec {
    /// Create a codec with explicit parameters.
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 || parity_shards == 0 || data_shards + parity_shards > 255 {
            return Err(CoreError::InvalidErasureParams {
                data: data_shards,
                parity: parity_shards,
            });
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Total shard count N = K + M.
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Physical-to-logical storage ratio, N/K.
    pub fn overhead_ratio(&self) -> f64 {
        self.total_shards() as f64 / self.data_shards as f64
    }

    fn codec(&self) -> Result<ReedSolomon> {
        ReedSolomon::new(self.data_shards, self.parity_shards).map_err(|_| {
            CoreError::InvalidErasureParams {
                data: self.data_shards,
                parity: self.parity_shards,
            }
        })
    }

    /// Encode a payload into N = K+M shards of equal size.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        if data.is_empty() {
            return Err(CoreError::ReconstructionFailed(
                "cannot encode empty payload".to_string(),
            ));
        }
        let rs = self.codec()?;
        let shard_size = data.len().div_ceil(self.data_shards);

        // Pad to K * shard_size, split into data shards, append zeroed parity.
        let mut padded = data.to_vec();
        padded.resize(shard_size * self.data_shards, 0);

        let mut shards: Vec<Vec<u8>> = (0..self.data_shards)
            .map(|i| padded[i * shard_size..(i + 1) * shard_size].to_vec())
            .collect();
        for _ in 0..self.parity_shards {
            shards.push(vec![0u8; shard_size]);
        }

        let mut shard_refs: Vec<&mut [u8]> = shards.iter_mut().map(|s| s.as_mut_slice()).collect();
        rs.encode(&mut shard_refs)
            .map_err(|e| CoreError::ReconstructionFailed(e.to_string()))?;

        Ok(shards)
    }

    /// Reconstruct the original payload from any K of the N shards.
    ///
    /// `shards` must have exactly N slots, with `None` marking missing
    /// fragments. `original_len` truncates the zero padding introduced by
    /// `encode`.
    pub fn reconstruct(
        &self,
        shards: Vec<Option<Vec<u8>>>,
        original_len: usize,
    ) -> Result<Vec<u8>> {
        let total = self.total_shards();
        if shards.len() != total {
            return Err(CoreError::ReconstructionFailed(format!(
                "expected {} shard slots, got {}",
                total,
                shards.len()
            )));
        }

        let present: Vec<&Vec<u8>> = shards.iter().flatten().collect();
        if present.len() < self.data_shards {
            return Err(CoreError::InsufficientFragments {
                needed: self.data_shards,
                available: present.len(),
            });
        }
        let shard_size = present[0].len();
        if present.iter().any(|s| s.len() != shard_size) {
            return Err(CoreError::ReconstructionFailed(
                "fragments have differing sizes".to_string(),
            ));
        }

        // Fill missing slots with zeroed buffers and reconstruct in place.
        let mut buffers: Vec<Vec<u8>> = Vec::with_capacity(total);
        let mut flags: Vec<bool> = Vec::with_capacity(total);
        for slot in shards {
            match slot {
                Some(data) => {
                    buffers.push(data);
                    flags.push(true);
                }
                None => {
                    buffers.push(vec![0u8; shard_size]);
                    flags.push(false);
                }
            }
        }

        let rs = self.codec()?;
        let mut shard_refs: Vec<(&mut [u8], bool)> = buffers
            .iter_mut()
            .zip(flags.iter())
            .map(|(s, &p)| (s.as_mut_slice(), p))
            .collect();
        rs.reconstruct_data(&mut shard_refs)
            .map_err(|e| CoreError::ReconstructionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(original_len);
        for buf in buffers.iter().take(self.data_shards) {
            out.extend_from_slice(buf);
        }
        if out.len() < original_len {
            return Err(CoreError::ReconstructionFailed(format!(
                "reconstructed {} bytes, expected at least {}",
                out.len(),
                original_len
            )));
        }
        out.truncate(original_len);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    // ---------------------------------------------------------------
    // Encode shape
    // ---------------------------------------------------------------

    #[test]
    fn test_encode_produces_n_equal_shards() {
        let codec = ErasureCodec::default();
        let shards = codec.encode(&payload(1000)).unwrap();
        assert_eq!(shards.len(), 5);
        let size = shards[0].len();
        assert!(shards.iter().all(|s| s.len() == size));
        // ceil(1000 / 3) = 334
        assert_eq!(size, 334);
    }

    #[test]
    fn test_encode_rejects_empty() {
        let codec = ErasureCodec::default();
        assert!(codec.encode(&[]).is_err());
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(ErasureCodec::new(0, 2).is_err());
        assert!(ErasureCodec::new(3, 0).is_err());
        assert!(ErasureCodec::new(200, 100).is_err());
    }

    // ---------------------------------------------------------------
    // Any K of N reconstruct
    // ---------------------------------------------------------------

    #[test]
    fn test_reconstruct_from_all_shards() {
        let codec = ErasureCodec::default();
        let data = payload(10_000);
        let shards = codec.encode(&data).unwrap();
        let slots: Vec<_> = shards.into_iter().map(Some).collect();
        assert_eq!(codec.reconstruct(slots, data.len()).unwrap(), data);
    }

    #[test]
    fn test_any_three_of_five_reconstruct() {
        let codec = ErasureCodec::default();
        let data = payload(4096);
        let original_hash = ContentHash::of(&data);
        let shards = codec.encode(&data).unwrap();

        // Every way of dropping two of the five shards must still decode.
        for drop_a in 0..5 {
            for drop_b in (drop_a + 1)..5 {
                let slots: Vec<Option<Vec<u8>>> = shards
                    .iter()
                    .enumerate()
                    .map(|(i, s)| {
                        if i == drop_a || i == drop_b {
                            None
                        } else {
                            Some(s.clone())
                        }
                    })
                    .collect();
                let rebuilt = codec.reconstruct(slots, data.len()).unwrap();
                assert!(
                    original_hash.verify(&rebuilt),
                    "dropping shards {drop_a},{drop_b} corrupted the payload"
                );
            }
        }
    }

    #[test]
    fn test_two_shards_insufficient() {
        let codec = ErasureCodec::default();
        let data = payload(512);
        let shards = codec.encode(&data).unwrap();
        let slots: Vec<Option<Vec<u8>>> = shards
            .into_iter()
            .enumerate()
            .map(|(i, s)| if i < 2 { Some(s) } else { None })
            .collect();
        match codec.reconstruct(slots, data.len()) {
            Err(CoreError::InsufficientFragments { needed, available }) => {
                assert_eq!(needed, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientFragments, got {other:?}"),
        }
    }

    #[test]
    fn test_reconstruct_rejects_wrong_slot_count() {
        let codec = ErasureCodec::default();
        let data = payload(128);
        let shards = codec.encode(&data).unwrap();
        let slots: Vec<_> = shards.into_iter().take(4).map(Some).collect();
        assert!(codec.reconstruct(slots, data.len()).is_err());
    }

    #[test]
    fn test_reconstruct_rejects_mismatched_sizes() {
        let codec = ErasureCodec::default();
        let data = payload(300);
        let mut shards = codec.encode(&data).unwrap();
        shards[1].push(0);
        let slots: Vec<_> = shards.into_iter().map(Some).collect();
        assert!(codec.reconstruct(slots, data.len()).is_err());
    }

    // ---------------------------------------------------------------
    // Sizes that exercise padding
    // ---------------------------------------------------------------

    #[test]
    fn test_padding_lengths_roundtrip() {
        let codec = ErasureCodec::default();
        for len in [1, 2, 3, 4, 5, 6, 7, 100, 1023, 1024, 1025] {
            let data = payload(len);
            let shards = codec.encode(&data).unwrap();
            let slots: Vec<_> = shards.into_iter().map(Some).collect();
            assert_eq!(
                codec.reconstruct(slots, len).unwrap(),
                data,
                "length {len} failed roundtrip"
            );
        }
    }

    #[test]
    fn test_overhead_ratio() {
        let codec = ErasureCodec::default();
        assert!((codec.overhead_ratio() - 5.0 / 3.0).abs() < 1e-9);
    }
}
