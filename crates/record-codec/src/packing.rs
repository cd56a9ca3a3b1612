//! Data packing algorithms.
//!
//! - Simple packing (template 5.0)
//! - IEEE floating point (template 5.4, 32-bit precision)
//!
//! Only points marked present in the bitmap are stored; absent points
//! decode to NaN.

use crate::error::{RecordError, RecordResult};

/// Parameters of simple packing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplePacking {
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

/// How values are written into the data section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packing {
    Simple(SimplePacking),
    Ieee,
}

impl Packing {
    pub fn template(&self) -> u16 {
        match self {
            Packing::Simple(_) => 0,
            Packing::Ieee => 4,
        }
    }
}

/// Requested packing when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackingOptions {
    #[default]
    Ieee,
    Simple { bits_per_value: u8, decimal_scale_factor: i16 },
}

/// Unpack simple packed data.
///
/// value = (R + X * 2^E) * 10^(-D)
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: usize,
    params: &SimplePacking,
    bitmap: Option<&[u8]>,
) -> RecordResult<Vec<f32>> {
    let reference = params.reference_value as f64;
    let decimal_scale = 10.0_f64.powi(-(params.decimal_scale_factor as i32));

    if params.bits_per_value == 0 {
        let constant = (reference * decimal_scale) as f32;
        return Ok((0..num_points)
            .map(|i| if is_present(bitmap, i) { constant } else { f32::NAN })
            .collect());
    }

    let binary_scale = 2.0_f64.powi(params.binary_scale_factor as i32);
    let bits_per_value = params.bits_per_value as usize;
    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0;

    for i in 0..num_points {
        if !is_present(bitmap, i) {
            values.push(f32::NAN);
            continue;
        }

        let packed_value = extract_bits(packed_data, bit_position, bits_per_value)
            .map_err(|e| RecordError::Unpacking(format!("failed to extract bits: {}", e)))?;
        bit_position += bits_per_value;

        let value = (reference + packed_value as f64 * binary_scale) * decimal_scale;
        values.push(value as f32);
    }

    Ok(values)
}

/// Pack values with simple packing.
///
/// NaN values are skipped; the caller marks them absent in the bitmap.
pub fn pack_simple(
    values: &[f32],
    bits_per_value: u8,
    decimal_scale_factor: i16,
) -> RecordResult<(SimplePacking, Vec<u8>)> {
    if bits_per_value > 32 {
        return Err(RecordError::Unpacking(format!(
            "invalid number of bits: {}",
            bits_per_value
        )));
    }

    let scale = 10.0_f64.powi(decimal_scale_factor as i32);
    let scaled: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| v as f64 * scale)
        .collect();

    let min = scaled.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if scaled.is_empty() || max == min || bits_per_value == 0 {
        let reference = if scaled.is_empty() { 0.0 } else { min };
        return Ok((
            SimplePacking {
                reference_value: reference as f32,
                binary_scale_factor: 0,
                decimal_scale_factor,
                bits_per_value: 0,
            },
            Vec::new(),
        ));
    }

    // The reference is stored as f32; pack against the rounded value.
    let reference = min as f32;
    let range = max - reference as f64;
    let max_packed = ((1u64 << bits_per_value) - 1) as f64;
    let binary_scale_factor = (range / max_packed).log2().ceil() as i16;
    let binary_scale = 2.0_f64.powi(binary_scale_factor as i32);

    let mut writer = BitWriter::default();
    for v in scaled {
        let packed = ((v - reference as f64) / binary_scale)
            .round()
            .clamp(0.0, max_packed) as u32;
        writer.push(packed, bits_per_value as usize);
    }

    Ok((
        SimplePacking {
            reference_value: reference,
            binary_scale_factor,
            decimal_scale_factor,
            bits_per_value,
        },
        writer.finish(),
    ))
}

/// Unpack big-endian IEEE 32-bit floats.
pub fn unpack_ieee(data: &[u8], num_points: usize, bitmap: Option<&[u8]>) -> RecordResult<Vec<f32>> {
    let mut values = Vec::with_capacity(num_points);
    let mut words = data.chunks_exact(4);
    for i in 0..num_points {
        if !is_present(bitmap, i) {
            values.push(f32::NAN);
            continue;
        }
        let word = words
            .next()
            .ok_or_else(|| RecordError::Unpacking("not enough IEEE values".to_string()))?;
        values.push(f32::from_be_bytes([word[0], word[1], word[2], word[3]]));
    }
    Ok(values)
}

/// Pack non-NaN values as big-endian IEEE 32-bit floats.
pub fn pack_ieee(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .flat_map(|v| v.to_be_bytes())
        .collect()
}

/// Build a bitmap for values containing NaN, or `None` when all are present.
pub fn build_bitmap(values: &[f32]) -> Option<Vec<u8>> {
    if !values.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mut bitmap = vec![0u8; values.len().div_ceil(8)];
    for (i, v) in values.iter().enumerate() {
        if !v.is_nan() {
            bitmap[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    Some(bitmap)
}

fn is_present(bitmap: Option<&[u8]>, i: usize) -> bool {
    match bitmap {
        // 1 bit per point, MSB first, 1 = present
        Some(bm) => bm
            .get(i / 8)
            .map(|byte| (byte >> (7 - (i % 8))) & 1 == 1)
            .unwrap_or(false),
        None => true,
    }
}

/// Extract bits from a byte array, MSB first.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Result<u32, String> {
    if num_bits > 32 || num_bits == 0 {
        return Err(format!("invalid number of bits: {}", num_bits));
    }

    let mut result = 0u32;
    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let byte_idx = absolute_bit / 8;
        let bit_idx = 7 - (absolute_bit % 8);

        let byte = data
            .get(byte_idx)
            .ok_or_else(|| "not enough data to extract bits".to_string())?;
        result = (result << 1) | ((byte >> bit_idx) & 1) as u32;
    }
    Ok(result)
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    fn push(&mut self, value: u32, num_bits: usize) {
        for i in (0..num_bits).rev() {
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            if let Some(last) = self.bytes.last_mut() {
                *last |= bit << (7 - (self.bit_len % 8));
            }
            self.bit_len += 1;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
