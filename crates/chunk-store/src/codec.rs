//! Chunk byte encoding through the array's zarrs codec chain:
//! little-endian `bytes`, optionally followed by gzip.

use std::borrow::Cow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::array::codec::{
    ArrayToBytesCodecTraits, BytesToBytesCodecTraits, CodecOptions, GzipCodec,
};
use zarrs::array::{transmute_from_bytes_vec, transmute_to_bytes_vec, Array, ArrayBytes};
use zarrs::metadata::v3::MetadataV3;

use era5_common::{ConversionError, ConversionResult, DataType};

/// Compression applied after the bytes codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum Compression {
    None,
    Gzip { level: u32 },
}

impl Default for Compression {
    fn default() -> Self {
        Self::Gzip { level: 5 }
    }
}

impl Compression {
    /// Bytes-to-bytes codecs for an array builder.
    pub fn bytes_to_bytes_codecs(&self) -> ConversionResult<Vec<Arc<dyn BytesToBytesCodecTraits>>> {
        match self {
            Compression::None => Ok(Vec::new()),
            Compression::Gzip { level } => {
                let gzip: Arc<dyn BytesToBytesCodecTraits> = Arc::new(
                    GzipCodec::new(*level)
                        .map_err(|e| ConversionError::configuration(e.to_string()))?,
                );
                Ok(vec![gzip])
            }
        }
    }

    /// Recover the setting from an array's codec metadata.
    pub fn from_codecs(codecs: &[MetadataV3]) -> Option<Self> {
        match codecs {
            [bytes] if bytes.name() == "bytes" => Some(Compression::None),
            [bytes, gzip] if bytes.name() == "bytes" && gzip.name() == "gzip" => {
                let level = gzip.configuration()?.get("level")?.as_u64()?;
                Some(Compression::Gzip { level: level as u32 })
            }
            _ => None,
        }
    }

    pub fn validate(&self) -> ConversionResult<()> {
        match self {
            Compression::Gzip { level } if *level > 9 => Err(ConversionError::configuration(
                format!("gzip level {} must be 0-9", level),
            )),
            _ => Ok(()),
        }
    }
}

/// Time-major chunk indices: only the first dimension is split.
pub fn chunk_indices<T: ?Sized>(array: &Array<T>, chunk_index: u64) -> Vec<u64> {
    let mut indices = vec![0; array.dimensionality()];
    if let Some(first) = indices.first_mut() {
        *first = chunk_index;
    }
    indices
}

/// Encode samples into the stored bytes of one data chunk.
///
/// Output depends only on the input values and the array's codecs, so
/// identical chunks always produce identical objects.
pub fn encode_chunk<T: ?Sized>(
    array: &Array<T>,
    chunk_index: u64,
    values: &[f32],
    dtype: DataType,
) -> ConversionResult<Vec<u8>> {
    let raw = match dtype {
        DataType::Float32 => transmute_to_bytes_vec(values.to_vec()),
        DataType::Float64 => {
            transmute_to_bytes_vec(values.iter().map(|&v| v as f64).collect::<Vec<f64>>())
        }
    };
    encode_raw(array, chunk_index, raw)
}

/// Decode the stored bytes of one data chunk into f32 samples.
pub fn decode_chunk<T: ?Sized>(
    array: &Array<T>,
    chunk_index: u64,
    data: &[u8],
    dtype: DataType,
) -> ConversionResult<Vec<f32>> {
    let indices = chunk_indices(array, chunk_index);
    let representation = array
        .chunk_array_representation(&indices)
        .map_err(|e| ConversionError::storage(e.to_string()))?;
    let decoded = array
        .codecs()
        .decode(Cow::Borrowed(data), &representation, &CodecOptions::default())
        .and_then(|bytes| bytes.into_fixed())
        .map_err(|e| {
            ConversionError::storage(format!(
                "chunk {} of {}: {}",
                chunk_index,
                array.path(),
                e
            ))
        })?
        .into_owned();

    Ok(match dtype {
        DataType::Float32 => transmute_from_bytes_vec::<f32>(decoded),
        DataType::Float64 => transmute_from_bytes_vec::<f64>(decoded)
            .into_iter()
            .map(|v| v as f32)
            .collect(),
    })
}

/// Encode coordinate labels for a one-dimensional coordinate array.
pub fn encode_labels<T, E>(array: &Array<T>, chunk_index: u64, labels: Vec<E>) -> ConversionResult<Vec<u8>>
where
    T: ?Sized,
    E: bytemuck::NoUninit,
{
    encode_raw(array, chunk_index, transmute_to_bytes_vec(labels))
}

fn encode_raw<T: ?Sized>(array: &Array<T>, chunk_index: u64, raw: Vec<u8>) -> ConversionResult<Vec<u8>> {
    let indices = chunk_indices(array, chunk_index);
    let representation = array
        .chunk_array_representation(&indices)
        .map_err(|e| ConversionError::storage(e.to_string()))?;
    let encoded = array
        .codecs()
        .encode(ArrayBytes::new_flen(raw), &representation, &CodecOptions::default())
        .map_err(|e| {
            ConversionError::storage(format!(
                "chunk {} of {}: {}",
                chunk_index,
                array.path(),
                e
            ))
        })?;
    Ok(encoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zarrs::array::{ArrayBuilder, DataType as ZarrType, FillValue};
    use zarrs::array::codec::BytesCodec;

    fn array(compression: Compression, data_type: ZarrType, fill: FillValue) -> Array<()> {
        ArrayBuilder::new(
            vec![4, 5],
            data_type,
            vec![2, 5].try_into().unwrap(),
            fill,
        )
        .array_to_bytes_codec(Arc::new(BytesCodec::little()))
        .bytes_to_bytes_codecs(compression.bytes_to_bytes_codecs().unwrap())
        .build(Arc::new(()), "/sfc/t2m")
        .unwrap()
    }

    #[test]
    fn test_gzip_is_deterministic() {
        let gz = Compression::Gzip { level: 5 };
        let array = array(gz, ZarrType::Float32, FillValue::from(f32::NAN));
        let values: Vec<f32> = (0..10).map(|i| (i as f32).sin()).collect();
        let a = encode_chunk(&array, 1, &values, DataType::Float32).unwrap();
        let b = encode_chunk(&array, 1, &values, DataType::Float32).unwrap();
        assert_eq!(a, b);
        assert_eq!(decode_chunk(&array, 1, &a, DataType::Float32).unwrap(), values);
    }

    #[test]
    fn test_bytes_are_little_endian() {
        let array = array(Compression::None, ZarrType::Float32, FillValue::from(f32::NAN));
        let mut values = vec![0.0f32; 10];
        values[0] = 1.0;
        values[1] = f32::NAN;
        let bytes = encode_chunk(&array, 0, &values, DataType::Float32).unwrap();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        let decoded = decode_chunk(&array, 0, &bytes, DataType::Float32).unwrap();
        assert_eq!(decoded[0], 1.0);
        assert!(decoded[1].is_nan());
    }

    #[test]
    fn test_float64_widens() {
        let array = array(Compression::None, ZarrType::Float64, FillValue::from(f64::NAN));
        let mut values = vec![0.5f32; 10];
        values[9] = f32::NAN;
        let bytes = encode_chunk(&array, 0, &values, DataType::Float64).unwrap();
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[..8], &0.5f64.to_le_bytes());
        let decoded = decode_chunk(&array, 0, &bytes, DataType::Float64).unwrap();
        assert_eq!(decoded[0], 0.5);
        assert!(decoded[9].is_nan());
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let array = array(Compression::None, ZarrType::Float32, FillValue::from(f32::NAN));
        assert!(encode_chunk(&array, 0, &[1.0; 7], DataType::Float32).is_err());
        assert!(decode_chunk(&array, 0, &[0u8; 12], DataType::Float32).is_err());
    }

    #[test]
    fn test_codecs_round_trip_through_metadata() {
        for compression in [Compression::None, Compression::Gzip { level: 3 }] {
            let array = array(compression, ZarrType::Float32, FillValue::from(f32::NAN));
            let zarrs::array::ArrayMetadata::V3(metadata) = array.metadata() else {
                panic!("expected v3 metadata");
            };
            assert_eq!(metadata.codecs[0].configuration().unwrap()["endian"], "little");
            assert_eq!(Compression::from_codecs(&metadata.codecs), Some(compression));
        }
        assert!(Compression::Gzip { level: 12 }.validate().is_err());
    }

    #[test]
    fn test_chunk_indices_split_time_only() {
        let array = array(Compression::None, ZarrType::Float32, FillValue::from(f32::NAN));
        assert_eq!(chunk_indices(&array, 1), vec![1, 0]);
        assert_eq!(array.chunk_key(&chunk_indices(&array, 1)).as_str(), "sfc/t2m/c/1/0");
    }
}
