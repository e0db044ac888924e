//! 8-bit scalar quantization.
//!
//! Each dimension is mapped linearly from its trained `[min, max]` range
//! onto `0..=255`. Decoding is lossy by at most half a quantization step.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Per-dimension min/max scalar quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    dims: usize,
    min_values: Vec<f32>,
    max_values: Vec<f32>,
}

impl ScalarQuantizer {
    /// Train on `vectors`, `dims` floats each, laid out back to back.
    pub fn train(dims: usize, vectors: &[f32]) -> Result<Self> {
        if dims == 0 || vectors.is_empty() || vectors.len() % dims != 0 {
            return Err(StrataError::vector(format!(
                "cannot train quantizer on {} floats of dimension {dims}",
                vectors.len()
            )));
        }

        let mut min_values = vec![f32::INFINITY; dims];
        let mut max_values = vec![f32::NEG_INFINITY; dims];
        for vector in vectors.chunks_exact(dims) {
            for (i, &value) in vector.iter().enumerate() {
                min_values[i] = min_values[i].min(value);
                max_values[i] = max_values[i].max(value);
            }
        }

        Ok(ScalarQuantizer {
            dims,
            min_values,
            max_values,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Check that the per-dimension ranges cover `dims` dimensions.
    pub fn validate(&self) -> Result<()> {
        if self.min_values.len() != self.dims || self.max_values.len() != self.dims {
            return Err(StrataError::corrupt(format!(
                "quantizer of dimension {} holds {} minimums and {} maximums",
                self.dims,
                self.min_values.len(),
                self.max_values.len()
            )));
        }
        Ok(())
    }

    /// Append the codes of one vector to `out`.
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        for (i, &value) in vector.iter().enumerate().take(self.dims) {
            let min = self.min_values[i];
            let range = self.max_values[i] - min;
            let code = if range > 0.0 {
                ((value - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                0
            };
            out.push(code);
        }
    }

    /// Decode one vector's codes into `out`, replacing its contents.
    pub fn decode_into(&self, codes: &[u8], out: &mut Vec<f32>) {
        out.clear();
        for (i, &code) in codes.iter().enumerate().take(self.dims) {
            let min = self.min_values[i];
            let range = self.max_values[i] - min;
            out.push(min + (code as f32 / 255.0) * range);
        }
    }
}
