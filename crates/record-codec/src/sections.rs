//! Record section parsing.
//!
//! A record is a GRIB2-framed message: a 16-byte indicator, then sections
//! each prefixed by a 4-byte big-endian length and a 1-byte section number,
//! then the `7777` end marker.
//!
//! | Section | Content |
//! |---|---|
//! | 0 | Indicator: `GRIB`, discipline, edition 2, total length |
//! | 1 | Identification: centre, reference time |
//! | 3 | Grid definition (templates 0, 40, 50) |
//! | 4 | Product definition: parameter id, level, step |
//! | 5 | Data representation (templates 0, 4) |
//! | 6 | Bitmap (optional) |
//! | 7 | Data |

use chrono::{DateTime, NaiveDate, Utc};

use era5_common::{BoundingBox, Grid, LevelKind};

use crate::error::{RecordError, RecordResult};
use crate::packing::{Packing, SimplePacking};

pub const MAGIC: &[u8; 4] = b"GRIB";
pub const EDITION: u8 = 2;
pub const END_MARKER: &[u8; 4] = b"7777";
pub const INDICATOR_LEN: usize = 16;

/// Originating centre code of ECMWF.
pub const ECMWF_CENTRE: u16 = 98;

pub const LEVEL_TYPE_SURFACE: u8 = 1;
pub const LEVEL_TYPE_ISOBARIC: u8 = 100;
pub const LEVEL_TYPE_HYBRID: u8 = 105;

/// Section 0: Indicator
#[derive(Debug, Clone)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification
#[derive(Debug, Clone)]
pub struct Identification {
    pub centre: u16,
    pub sub_centre: u16,
    pub reference_time: DateTime<Utc>,
}

/// Section 4: Product Definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductDefinition {
    pub param_id: u32,
    pub level_type: u8,
    pub level_value: u32,
    pub step_hours: u32,
}

impl ProductDefinition {
    pub fn level_kind(&self) -> RecordResult<LevelKind> {
        match self.level_type {
            LEVEL_TYPE_SURFACE => Ok(LevelKind::Surface),
            LEVEL_TYPE_ISOBARIC => Ok(LevelKind::Pressure),
            LEVEL_TYPE_HYBRID => Ok(LevelKind::Model),
            other => Err(RecordError::section(
                4,
                format!("unknown level type {}", other),
            )),
        }
    }

    /// Level value, `None` at the surface.
    pub fn level(&self) -> RecordResult<Option<u32>> {
        Ok(match self.level_kind()? {
            LevelKind::Surface => None,
            LevelKind::Model | LevelKind::Pressure => Some(self.level_value),
        })
    }
}

pub fn level_type_code(kind: LevelKind) -> u8 {
    match kind {
        LevelKind::Surface => LEVEL_TYPE_SURFACE,
        LevelKind::Pressure => LEVEL_TYPE_ISOBARIC,
        LevelKind::Model => LEVEL_TYPE_HYBRID,
    }
}

/// Section 5: Data Representation
#[derive(Debug, Clone, Copy)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub packing: Packing,
}

/// Byte ranges of the sections of one message.
#[derive(Debug, Default, Clone)]
pub struct SectionTable {
    offsets: [Option<(usize, usize)>; 8],
}

impl SectionTable {
    /// Walk every section between the indicator and the end marker.
    pub fn scan(message: &[u8]) -> RecordResult<Self> {
        let mut table = SectionTable::default();
        let end = message.len().saturating_sub(END_MARKER.len());
        let mut offset = INDICATOR_LEN;

        while offset < end {
            if offset + 5 > end {
                return Err(RecordError::InvalidFormat(format!(
                    "dangling bytes at offset {}",
                    offset
                )));
            }
            let section_length = be_u32(message, offset)? as usize;
            let number = message[offset + 4];
            if section_length < 5 || offset + section_length > end {
                return Err(RecordError::section(number, "invalid section length"));
            }
            match table.offsets.get_mut(number as usize) {
                Some(slot) if number != 0 && number != 2 => {
                    *slot = Some((offset, section_length));
                }
                _ => {
                    return Err(RecordError::section(number, "unexpected section number"));
                }
            }
            offset += section_length;
        }

        Ok(table)
    }

    /// Bytes of a section, including its 5-byte header.
    pub fn get<'a>(&self, message: &'a [u8], number: u8) -> Option<&'a [u8]> {
        self.offsets
            .get(number as usize)
            .copied()
            .flatten()
            .map(|(start, len)| &message[start..start + len])
    }

    pub fn require<'a>(&self, message: &'a [u8], number: u8) -> RecordResult<&'a [u8]> {
        self.get(message, number)
            .ok_or(RecordError::MissingSection(number))
    }
}

/// Parse Section 0 (Indicator) from the start of a message.
pub fn parse_indicator(data: &[u8]) -> RecordResult<Indicator> {
    if data.len() < INDICATOR_LEN {
        return Err(RecordError::InvalidFormat(
            "not enough data for indicator section".to_string(),
        ));
    }
    if &data[0..4] != MAGIC {
        return Err(RecordError::InvalidFormat("invalid magic bytes".to_string()));
    }

    // Octets 5-6 reserved, 7 discipline, 8 edition, 9-16 total length.
    let discipline = data[6];
    let edition = data[7];
    let message_length = be_u64(data, 8)?;

    if edition != EDITION {
        return Err(RecordError::InvalidFormat(format!(
            "expected edition {}, got {}",
            EDITION, edition
        )));
    }

    Ok(Indicator {
        discipline,
        edition,
        message_length,
    })
}

/// Parse Section 1 (Identification).
pub fn parse_identification(section: &[u8]) -> RecordResult<Identification> {
    if section.len() < 17 {
        return Err(RecordError::section(1, "not enough data"));
    }

    let centre = be_u16(section, 5)?;
    let sub_centre = be_u16(section, 7)?;
    // section[9] is the significance of the reference time
    let year = be_u16(section, 10)?;
    let (month, day, hour, minute, second) = (
        section[12], section[13], section[14], section[15], section[16],
    );

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| {
            RecordError::section(
                1,
                format!(
                    "invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                ),
            )
        })?;

    Ok(Identification {
        centre,
        sub_centre,
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
    })
}

/// Parse Section 3 (Grid Definition) into a [`Grid`].
pub fn parse_grid_definition(section: &[u8]) -> RecordResult<Grid> {
    let template = be_u16(section, 5)?;
    match template {
        0 => {
            // Regular lat/lon. Coordinates in microdegrees, first point is
            // the north-west corner.
            need(section, 3, 39)?;
            let ni = be_u32(section, 7)?;
            let nj = be_u32(section, 11)?;
            let la1 = be_i32(section, 15)? as f64 / 1e6;
            let lo1 = be_i32(section, 19)? as f64 / 1e6;
            let la2 = be_i32(section, 23)? as f64 / 1e6;
            let lo2 = be_i32(section, 27)? as f64 / 1e6;
            let di = be_u32(section, 31)? as f64 / 1e6;
            let dj = be_u32(section, 35)? as f64 / 1e6;

            if (di - dj).abs() > 1e-9 || di <= 0.0 {
                return Err(RecordError::section(
                    3,
                    format!("non-square increments {} x {}", di, dj),
                ));
            }
            let grid = Grid::RegularLatLon {
                resolution: di,
                bounds: BoundingBox::new(lo1, la2, lo2, la1),
            };
            if grid.regular_shape() != Some((nj as usize, ni as usize)) {
                return Err(RecordError::section(
                    3,
                    format!("{} x {} points do not match bounds", ni, nj),
                ));
            }
            Ok(grid)
        }
        40 => {
            // Reduced Gaussian. N, row count, name, then points per row.
            need(section, 3, 16)?;
            let rows = be_u32(section, 11)? as usize;
            let name_len = section[15] as usize;
            let name_end = 16 + name_len;
            need(section, 3, name_end + rows * 2)?;
            let name = std::str::from_utf8(&section[16..name_end])
                .map_err(|_| RecordError::section(3, "grid name is not UTF-8"))?
                .to_string();
            let points_per_latitude = (0..rows)
                .map(|r| be_u16(section, name_end + r * 2).map(u32::from))
                .collect::<RecordResult<Vec<_>>>()?;
            Ok(Grid::ReducedGaussian {
                name,
                points_per_latitude,
            })
        }
        50 => {
            // Spherical harmonics. Only triangular truncation (J = K = M).
            need(section, 3, 19)?;
            let j = be_u32(section, 7)?;
            let k = be_u32(section, 11)?;
            let m = be_u32(section, 15)?;
            if j != k || k != m {
                return Err(RecordError::section(
                    3,
                    format!("non-triangular truncation J={} K={} M={}", j, k, m),
                ));
            }
            Ok(Grid::SpectralHarmonic { truncation: j })
        }
        other => Err(RecordError::UnsupportedTemplate {
            section: 3,
            template: other,
        }),
    }
}

/// Parse Section 4 (Product Definition).
pub fn parse_product_definition(section: &[u8]) -> RecordResult<ProductDefinition> {
    need(section, 4, 20)?;
    let template = be_u16(section, 5)?;
    if template != 0 {
        return Err(RecordError::UnsupportedTemplate {
            section: 4,
            template,
        });
    }
    Ok(ProductDefinition {
        param_id: be_u32(section, 7)?,
        level_type: section[11],
        level_value: be_u32(section, 12)?,
        step_hours: be_u32(section, 16)?,
    })
}

/// Parse Section 5 (Data Representation).
pub fn parse_data_representation(section: &[u8]) -> RecordResult<DataRepresentation> {
    need(section, 5, 11)?;
    let num_data_points = be_u32(section, 5)?;
    let template = be_u16(section, 9)?;
    let packing = match template {
        0 => {
            need(section, 5, 20)?;
            Packing::Simple(SimplePacking {
                reference_value: f32::from_bits(be_u32(section, 11)?),
                binary_scale_factor: be_i16(section, 15)?,
                decimal_scale_factor: be_i16(section, 17)?,
                bits_per_value: section[19],
            })
        }
        4 => {
            need(section, 5, 12)?;
            if section[11] != 1 {
                return Err(RecordError::section(
                    5,
                    format!("unsupported IEEE precision {}", section[11]),
                ));
            }
            Packing::Ieee
        }
        other => {
            return Err(RecordError::UnsupportedTemplate {
                section: 5,
                template: other,
            })
        }
    };
    Ok(DataRepresentation {
        num_data_points,
        packing,
    })
}

/// Parse Section 6 (Bitmap). Returns `None` when no bitmap applies.
pub fn parse_bitmap(section: Option<&[u8]>) -> RecordResult<Option<&[u8]>> {
    let Some(section) = section else {
        return Ok(None);
    };
    need(section, 6, 6)?;
    match section[5] {
        255 => Ok(None),
        0 => Ok(Some(&section[6..])),
        other => Err(RecordError::section(
            6,
            format!("unsupported bitmap indicator {}", other),
        )),
    }
}

fn need(section: &[u8], number: u8, len: usize) -> RecordResult<()> {
    if section.len() < len {
        return Err(RecordError::section(
            number,
            format!("needs at least {} bytes, got {}", len, section.len()),
        ));
    }
    Ok(())
}

fn slice<const N: usize>(data: &[u8], at: usize) -> RecordResult<[u8; N]> {
    data.get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(RecordError::Truncated {
            expected: at + N,
            actual: data.len(),
        })
}

pub(crate) fn be_u16(data: &[u8], at: usize) -> RecordResult<u16> {
    slice::<2>(data, at).map(u16::from_be_bytes)
}

fn be_i16(data: &[u8], at: usize) -> RecordResult<i16> {
    slice::<2>(data, at).map(i16::from_be_bytes)
}

pub(crate) fn be_u32(data: &[u8], at: usize) -> RecordResult<u32> {
    slice::<4>(data, at).map(u32::from_be_bytes)
}

fn be_i32(data: &[u8], at: usize) -> RecordResult<i32> {
    slice::<4>(data, at).map(i32::from_be_bytes)
}

pub(crate) fn be_u64(data: &[u8], at: usize) -> RecordResult<u64> {
    slice::<8>(data, at).map(u64::from_be_bytes)
}
