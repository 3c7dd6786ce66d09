//! Weight storage formats and block dequantization.
//!
//! Model files store each tensor in one of a handful of formats: plain
//! f32/f16, or block-quantized 4/5/8-bit. Quantized formats pack 32
//! values per block together with one or two f16 scale factors. All
//! formats dequantize to f32 before the tensors are handed to the
//! compute backend.

use half::f16;

use crate::error::{Error, Result};

/// Values per quantization block.
pub const BLOCK_SIZE: usize = 32;

/// On-disk storage format of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightType {
    F32,
    F16,
    Q4_0,
    Q4_1,
    Q5_0,
    Q5_1,
    Q8_0,
}

impl WeightType {
    /// Decodes the file-level ftype hyperparameter.
    pub fn from_ftype(ftype: i32) -> Result<Self> {
        match ftype {
            0 => Ok(WeightType::F32),
            1 => Ok(WeightType::F16),
            2 => Ok(WeightType::Q4_0),
            3 => Ok(WeightType::Q4_1),
            7 => Ok(WeightType::Q8_0),
            8 => Ok(WeightType::Q5_0),
            9 => Ok(WeightType::Q5_1),
            other => Err(Error::UnsupportedFormat(other)),
        }
    }

    /// Decodes a per-tensor-record type tag.
    ///
    /// Records use a different numbering than the file-level ftype.
    pub fn from_record_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(WeightType::F32),
            1 => Ok(WeightType::F16),
            2 => Ok(WeightType::Q4_0),
            3 => Ok(WeightType::Q4_1),
            6 => Ok(WeightType::Q5_0),
            7 => Ok(WeightType::Q5_1),
            8 => Ok(WeightType::Q8_0),
            other => Err(Error::UnsupportedFormat(other)),
        }
    }

    /// Values covered by one storage unit (block for quantized formats).
    pub fn block_size(&self) -> usize {
        match self {
            WeightType::F32 | WeightType::F16 => 1,
            _ => BLOCK_SIZE,
        }
    }

    /// Bytes per storage unit.
    pub fn unit_bytes(&self) -> usize {
        match self {
            WeightType::F32 => 4,
            WeightType::F16 => 2,
            WeightType::Q4_0 => 18,
            WeightType::Q4_1 => 20,
            WeightType::Q5_0 => 22,
            WeightType::Q5_1 => 24,
            WeightType::Q8_0 => 34,
        }
    }

    /// Packed byte size of `n_elements` values, if the element count is
    /// compatible with the block size.
    pub fn packed_bytes(&self, n_elements: usize) -> Option<usize> {
        if n_elements % self.block_size() != 0 {
            return None;
        }
        Some(n_elements / self.block_size() * self.unit_bytes())
    }

    /// Expands a packed payload to f32 values.
    ///
    /// The payload length must equal `packed_bytes(n_elements)`.
    pub fn dequantize(&self, data: &[u8], n_elements: usize) -> Vec<f32> {
        match self {
            WeightType::F32 => dequantize_f32(data, n_elements),
            WeightType::F16 => dequantize_f16(data, n_elements),
            WeightType::Q4_0 => dequantize_q4_0(data, n_elements),
            WeightType::Q4_1 => dequantize_q4_1(data, n_elements),
            WeightType::Q5_0 => dequantize_q5_0(data, n_elements),
            WeightType::Q5_1 => dequantize_q5_1(data, n_elements),
            WeightType::Q8_0 => dequantize_q8_0(data, n_elements),
        }
    }
}

fn read_f16(bytes: &[u8]) -> f32 {
    f16::from_le_bytes([bytes[0], bytes[1]]).to_f32()
}

fn dequantize_f32(data: &[u8], n: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(n);
    for chunk in data.chunks_exact(4).take(n) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    out
}

fn dequantize_f16(data: &[u8], n: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(n);
    for chunk in data.chunks_exact(2).take(n) {
        out.push(read_f16(chunk));
    }
    out
}

/// Q4_0: 18-byte block of f16 scale + 16 nibble-packed bytes.
/// Low nibbles fill values 0..16, high nibbles 16..32, value = d * (q - 8).
fn dequantize_q4_0(data: &[u8], n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n];
    for (b, block) in data.chunks_exact(18).enumerate() {
        let d = read_f16(&block[0..2]);
        let base = b * BLOCK_SIZE;
        for j in 0..16 {
            let byte = block[2 + j];
            out[base + j] = d * ((byte & 0x0f) as i32 - 8) as f32;
            out[base + j + 16] = d * ((byte >> 4) as i32 - 8) as f32;
        }
    }
    out
}

/// Q4_1: 20-byte block of f16 scale, f16 min, 16 nibble bytes.
/// value = d * q + m.
fn dequantize_q4_1(data: &[u8], n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n];
    for (b, block) in data.chunks_exact(20).enumerate() {
        let d = read_f16(&block[0..2]);
        let m = read_f16(&block[2..4]);
        let base = b * BLOCK_SIZE;
        for j in 0..16 {
            let byte = block[4 + j];
            out[base + j] = d * (byte & 0x0f) as f32 + m;
            out[base + j + 16] = d * (byte >> 4) as f32 + m;
        }
    }
    out
}

/// Q5_0: 22-byte block of f16 scale, packed fifth bits as u32, 16 nibble
/// bytes. value = d * (q - 16) with the fifth bit spliced in.
fn dequantize_q5_0(data: &[u8], n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n];
    for (b, block) in data.chunks_exact(22).enumerate() {
        let d = read_f16(&block[0..2]);
        let qh = u32::from_le_bytes([block[2], block[3], block[4], block[5]]);
        let base = b * BLOCK_SIZE;
        for j in 0..16 {
            let byte = block[6 + j];
            let high0 = ((qh >> j) << 4) & 0x10;
            let high1 = (qh >> (j + 12)) & 0x10;
            let q0 = ((byte & 0x0f) as u32 | high0) as i32 - 16;
            let q1 = ((byte >> 4) as u32 | high1) as i32 - 16;
            out[base + j] = d * q0 as f32;
            out[base + j + 16] = d * q1 as f32;
        }
    }
    out
}

/// Q5_1: 24-byte block of f16 scale, f16 min, packed fifth bits, 16
/// nibble bytes. value = d * q + m.
fn dequantize_q5_1(data: &[u8], n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n];
    for (b, block) in data.chunks_exact(24).enumerate() {
        let d = read_f16(&block[0..2]);
        let m = read_f16(&block[2..4]);
        let qh = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
        let base = b * BLOCK_SIZE;
        for j in 0..16 {
            let byte = block[8 + j];
            let high0 = ((qh >> j) << 4) & 0x10;
            let high1 = (qh >> (j + 12)) & 0x10;
            let q0 = (byte & 0x0f) as u32 | high0;
            let q1 = (byte >> 4) as u32 | high1;
            out[base + j] = d * q0 as f32 + m;
            out[base + j + 16] = d * q1 as f32 + m;
        }
    }
    out
}

/// Q8_0: 34-byte block of f16 scale + 32 signed bytes. value = d * q.
fn dequantize_q8_0(data: &[u8], n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n];
    for (b, block) in data.chunks_exact(34).enumerate() {
        let d = read_f16(&block[0..2]);
        let base = b * BLOCK_SIZE;
        for j in 0..32 {
            out[base + j] = d * (block[2 + j] as i8) as f32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ftype_mapping() {
        assert_eq!(WeightType::from_ftype(0).unwrap(), WeightType::F32);
        assert_eq!(WeightType::from_ftype(1).unwrap(), WeightType::F16);
        assert_eq!(WeightType::from_ftype(2).unwrap(), WeightType::Q4_0);
        assert_eq!(WeightType::from_ftype(7).unwrap(), WeightType::Q8_0);
        assert_eq!(WeightType::from_ftype(9).unwrap(), WeightType::Q5_1);
        assert!(WeightType::from_ftype(4).is_err());
        assert!(WeightType::from_ftype(5).is_err());
        assert!(WeightType::from_ftype(42).is_err());
    }

    #[test]
    fn test_record_tag_mapping() {
        assert_eq!(WeightType::from_record_tag(6).unwrap(), WeightType::Q5_0);
        assert_eq!(WeightType::from_record_tag(7).unwrap(), WeightType::Q5_1);
        assert_eq!(WeightType::from_record_tag(8).unwrap(), WeightType::Q8_0);
        assert!(WeightType::from_record_tag(4).is_err());
    }

    #[test]
    fn test_packed_bytes() {
        assert_eq!(WeightType::F32.packed_bytes(10), Some(40));
        assert_eq!(WeightType::Q4_0.packed_bytes(64), Some(36));
        assert_eq!(WeightType::Q8_0.packed_bytes(32), Some(34));
        // not a whole number of blocks
        assert_eq!(WeightType::Q4_0.packed_bytes(33), None);
    }

    #[test]
    fn test_dequantize_f32_roundtrip() {
        let values = [1.0f32, -2.5, 0.0, 3.75];
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(WeightType::F32.dequantize(&bytes, 4), values);
    }

    #[test]
    fn test_dequantize_f16() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&f16::from_f32(1.5).to_le_bytes());
        bytes.extend_from_slice(&f16::from_f32(-0.25).to_le_bytes());
        let out = WeightType::F16.dequantize(&bytes, 2);
        assert_eq!(out, vec![1.5, -0.25]);
    }

    #[test]
    fn test_dequantize_q4_0_block() {
        let mut block = Vec::new();
        block.extend_from_slice(&f16::from_f32(2.0).to_le_bytes());
        // first nibble byte: low = 9 (-> 1), high = 7 (-> -1)
        block.push(0x79);
        block.extend(std::iter::repeat(0x88).take(15)); // q = 8 -> 0.0
        let out = WeightType::Q4_0.dequantize(&block, 32);

        assert_eq!(out[0], 2.0); // 2.0 * (9 - 8)
        assert_eq!(out[16], -2.0); // 2.0 * (7 - 8)
        assert_eq!(out[1], 0.0);
        assert_eq!(out[17], 0.0);
    }

    #[test]
    fn test_dequantize_q4_1_block() {
        let mut block = Vec::new();
        block.extend_from_slice(&f16::from_f32(0.5).to_le_bytes());
        block.extend_from_slice(&f16::from_f32(1.0).to_le_bytes());
        block.push(0x32); // low = 2, high = 3
        block.extend(std::iter::repeat(0x00).take(15));
        let out = WeightType::Q4_1.dequantize(&block, 32);

        assert_eq!(out[0], 2.0); // 0.5 * 2 + 1.0
        assert_eq!(out[16], 2.5); // 0.5 * 3 + 1.0
        assert_eq!(out[1], 1.0); // 0.5 * 0 + 1.0
    }

    #[test]
    fn test_dequantize_q8_0_block() {
        let mut block = Vec::new();
        block.extend_from_slice(&f16::from_f32(0.25).to_le_bytes());
        block.push(4i8 as u8);
        block.push(-8i8 as u8);
        block.extend(std::iter::repeat(0u8).take(30));
        let out = WeightType::Q8_0.dequantize(&block, 32);

        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], -2.0);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn test_dequantize_q5_0_block() {
        // fifth bits all zero: value = d * (q_low - 16)
        let mut block = Vec::new();
        block.extend_from_slice(&f16::from_f32(1.0).to_le_bytes());
        block.extend_from_slice(&0u32.to_le_bytes());
        block.push(0x01); // low = 1 -> -15, high = 0 -> -16
        block.extend(std::iter::repeat(0x00).take(15));
        let out = WeightType::Q5_0.dequantize(&block, 32);

        assert_eq!(out[0], -15.0);
        assert_eq!(out[16], -16.0);

        // fifth bit set for value 0: q = 0x10 + 1 -> 1.0
        let mut block = Vec::new();
        block.extend_from_slice(&f16::from_f32(1.0).to_le_bytes());
        block.extend_from_slice(&1u32.to_le_bytes());
        block.push(0x01);
        block.extend(std::iter::repeat(0x00).take(15));
        let out = WeightType::Q5_0.dequantize(&block, 32);

        assert_eq!(out[0], 1.0); // (0x11 - 16) * 1.0
    }

    #[test]
    fn test_dequantize_q5_1_block() {
        let mut block = Vec::new();
        block.extend_from_slice(&f16::from_f32(2.0).to_le_bytes());
        block.extend_from_slice(&f16::from_f32(-1.0).to_le_bytes());
        block.extend_from_slice(&0u32.to_le_bytes());
        block.push(0x03); // low = 3
        block.extend(std::iter::repeat(0x00).take(15));
        let out = WeightType::Q5_1.dequantize(&block, 32);

        assert_eq!(out[0], 5.0); // 2.0 * 3 - 1.0
        assert_eq!(out[16], -1.0); // 2.0 * 0 - 1.0
    }
}
