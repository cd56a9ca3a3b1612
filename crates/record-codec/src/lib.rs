//! Codec for the archive's per-timestep grid records.
//!
//! Records use GRIB2 framing with the subset of templates the archive
//! needs: regular lat/lon (3.0), reduced Gaussian (3.40) and spherical
//! harmonic (3.50) grids; simple packing (5.0) and IEEE floats (5.4).
//! Parameters are identified by their ECMWF parameter id.

pub mod error;
pub mod packing;
pub mod reader;
pub mod record;
pub mod sections;

pub use error::{RecordError, RecordResult};
pub use packing::PackingOptions;
pub use reader::{MessageEntry, RecordReader};
pub use record::{decode, decode_header, encode, Record, RecordHeader};
