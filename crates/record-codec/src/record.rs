//! Decoded records and the message encoder.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tracing::trace;

use era5_common::{Grid, LevelKind};

use crate::error::{RecordError, RecordResult};
use crate::packing::{self, Packing, PackingOptions};
use crate::sections::{self, SectionTable, ProductDefinition, END_MARKER, INDICATOR_LEN, MAGIC};

/// Identifying metadata of a record, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub param_id: u32,
    pub reference_time: DateTime<Utc>,
    pub step_hours: u32,
    pub level_kind: LevelKind,
    /// `None` for surface fields.
    pub level: Option<u32>,
}

impl RecordHeader {
    /// Reference time plus forecast step.
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.reference_time + Duration::hours(self.step_hours as i64)
    }
}

/// A fully decoded record.
#[derive(Debug, Clone)]
pub struct Record {
    pub header: RecordHeader,
    pub grid: Grid,
    /// Samples on `grid`; NaN where the bitmap marks a point absent.
    pub values: Vec<f32>,
}

/// Decode one message.
///
/// `data` must start at the indicator; trailing bytes after the declared
/// message length are ignored.
pub fn decode(data: &[u8]) -> RecordResult<Record> {
    let message = message_slice(data)?;
    let table = SectionTable::scan(message)?;

    let header = header_from(message, &table)?;
    let grid = sections::parse_grid_definition(table.require(message, 3)?)?;
    let representation = sections::parse_data_representation(table.require(message, 5)?)?;
    let bitmap = sections::parse_bitmap(table.get(message, 6))?;
    let data_section = &table.require(message, 7)?[5..];

    let num_points = representation.num_data_points as usize;
    if num_points != grid.value_count() {
        return Err(RecordError::section(
            5,
            format!(
                "{} data points but grid {} has {}",
                num_points,
                grid,
                grid.value_count()
            ),
        ));
    }

    let values = match &representation.packing {
        Packing::Simple(params) => packing::unpack_simple(data_section, num_points, params, bitmap)?,
        Packing::Ieee => packing::unpack_ieee(data_section, num_points, bitmap)?,
    };

    trace!(
        param_id = header.param_id,
        level = ?header.level,
        points = num_points,
        "Decoded record"
    );

    Ok(Record {
        header,
        grid,
        values,
    })
}

/// Decode only the identification and product definition of a message.
pub fn decode_header(data: &[u8]) -> RecordResult<RecordHeader> {
    let message = message_slice(data)?;
    let table = SectionTable::scan(message)?;
    header_from(message, &table)
}

/// Length in bytes of the message starting at `data`.
pub fn message_length(data: &[u8]) -> RecordResult<usize> {
    let indicator = sections::parse_indicator(data)?;
    Ok(indicator.message_length as usize)
}

fn message_slice(data: &[u8]) -> RecordResult<&[u8]> {
    let len = message_length(data)?;
    if len < INDICATOR_LEN + END_MARKER.len() {
        return Err(RecordError::InvalidFormat(format!(
            "message length {} is too small",
            len
        )));
    }
    if data.len() < len {
        return Err(RecordError::Truncated {
            expected: len,
            actual: data.len(),
        });
    }
    let message = &data[..len];
    if &message[len - END_MARKER.len()..] != END_MARKER {
        return Err(RecordError::InvalidFormat("missing end marker".to_string()));
    }
    Ok(message)
}

fn header_from(message: &[u8], table: &SectionTable) -> RecordResult<RecordHeader> {
    let identification = sections::parse_identification(table.require(message, 1)?)?;
    let product: ProductDefinition =
        sections::parse_product_definition(table.require(message, 4)?)?;
    Ok(RecordHeader {
        param_id: product.param_id,
        reference_time: identification.reference_time,
        step_hours: product.step_hours,
        level_kind: product.level_kind()?,
        level: product.level()?,
    })
}

/// Encode a record into a single message.
pub fn encode(record: &Record, options: PackingOptions) -> RecordResult<Vec<u8>> {
    if record.values.len() != record.grid.value_count() {
        return Err(RecordError::InvalidFormat(format!(
            "{} values for grid {} with {} points",
            record.values.len(),
            record.grid,
            record.grid.value_count()
        )));
    }

    let mut body = Vec::new();
    push_section(&mut body, 1, &identification_body(&record.header));
    push_section(&mut body, 3, &grid_body(&record.grid)?);
    push_section(&mut body, 4, &product_body(&record.header));

    let (representation, data) = match options {
        PackingOptions::Ieee => {
            let mut rep = Vec::new();
            rep.extend_from_slice(&(record.values.len() as u32).to_be_bytes());
            rep.extend_from_slice(&4u16.to_be_bytes());
            rep.push(1);
            (rep, packing::pack_ieee(&record.values))
        }
        PackingOptions::Simple {
            bits_per_value,
            decimal_scale_factor,
        } => {
            let (params, data) =
                packing::pack_simple(&record.values, bits_per_value, decimal_scale_factor)?;
            let mut rep = Vec::new();
            rep.extend_from_slice(&(record.values.len() as u32).to_be_bytes());
            rep.extend_from_slice(&0u16.to_be_bytes());
            rep.extend_from_slice(&params.reference_value.to_bits().to_be_bytes());
            rep.extend_from_slice(&params.binary_scale_factor.to_be_bytes());
            rep.extend_from_slice(&params.decimal_scale_factor.to_be_bytes());
            rep.push(params.bits_per_value);
            (rep, data)
        }
    };
    push_section(&mut body, 5, &representation);

    match packing::build_bitmap(&record.values) {
        Some(bitmap) => {
            let mut section = vec![0u8];
            section.extend_from_slice(&bitmap);
            push_section(&mut body, 6, &section);
        }
        None => push_section(&mut body, 6, &[255]),
    }
    push_section(&mut body, 7, &data);

    let total = INDICATOR_LEN + body.len() + END_MARKER.len();
    let mut message = Vec::with_capacity(total);
    message.extend_from_slice(MAGIC);
    message.extend_from_slice(&[0, 0]);
    message.push(0); // discipline: meteorological
    message.push(sections::EDITION);
    message.extend_from_slice(&(total as u64).to_be_bytes());
    message.extend_from_slice(&body);
    message.extend_from_slice(END_MARKER);
    Ok(message)
}

fn push_section(out: &mut Vec<u8>, number: u8, body: &[u8]) {
    out.extend_from_slice(&((body.len() + 5) as u32).to_be_bytes());
    out.push(number);
    out.extend_from_slice(body);
}

fn identification_body(header: &RecordHeader) -> Vec<u8> {
    let t = header.reference_time;
    let mut body = Vec::with_capacity(12);
    body.extend_from_slice(&sections::ECMWF_CENTRE.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.push(1); // start of forecast
    body.extend_from_slice(&(t.year() as u16).to_be_bytes());
    body.extend_from_slice(&[
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    ]);
    body
}

fn grid_body(grid: &Grid) -> RecordResult<Vec<u8>> {
    let mut body = Vec::new();
    match grid {
        Grid::RegularLatLon { resolution, bounds } => {
            let (nlat, nlon) = grid.regular_shape().unwrap_or((0, 0));
            let micro = |deg: f64| (deg * 1e6).round() as i32;
            body.extend_from_slice(&0u16.to_be_bytes());
            body.extend_from_slice(&(nlon as u32).to_be_bytes());
            body.extend_from_slice(&(nlat as u32).to_be_bytes());
            body.extend_from_slice(&micro(bounds.max_lat).to_be_bytes());
            body.extend_from_slice(&micro(bounds.min_lon).to_be_bytes());
            body.extend_from_slice(&micro(bounds.min_lat).to_be_bytes());
            body.extend_from_slice(&micro(bounds.max_lon).to_be_bytes());
            body.extend_from_slice(&(micro(*resolution) as u32).to_be_bytes());
            body.extend_from_slice(&(micro(*resolution) as u32).to_be_bytes());
        }
        Grid::ReducedGaussian {
            name,
            points_per_latitude,
        } => {
            if name.len() > u8::MAX as usize {
                return Err(RecordError::InvalidFormat(format!(
                    "grid name {} is too long",
                    name
                )));
            }
            body.extend_from_slice(&40u16.to_be_bytes());
            body.extend_from_slice(&((points_per_latitude.len() / 2) as u32).to_be_bytes());
            body.extend_from_slice(&(points_per_latitude.len() as u32).to_be_bytes());
            body.push(name.len() as u8);
            body.extend_from_slice(name.as_bytes());
            for &points in points_per_latitude {
                let points = u16::try_from(points).map_err(|_| {
                    RecordError::InvalidFormat(format!("row of {} points is too long", points))
                })?;
                body.extend_from_slice(&points.to_be_bytes());
            }
        }
        Grid::SpectralHarmonic { truncation } => {
            body.extend_from_slice(&50u16.to_be_bytes());
            for _ in 0..3 {
                body.extend_from_slice(&truncation.to_be_bytes());
            }
        }
    }
    Ok(body)
}

fn product_body(header: &RecordHeader) -> Vec<u8> {
    let mut body = Vec::with_capacity(15);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&header.param_id.to_be_bytes());
    body.push(sections::level_type_code(header.level_kind));
    body.extend_from_slice(&header.level.unwrap_or(0).to_be_bytes());
    body.extend_from_slice(&header.step_hours.to_be_bytes());
    body
}
