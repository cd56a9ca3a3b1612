//! Common types shared across the reanalysis conversion workspace.
//!
//! Everything here is static configuration or plain data: variables and
//! their native grids, vertical level sets, time axes and schedules, and the
//! error taxonomy every component reports through.

pub mod bbox;
pub mod coordinate;
pub mod error;
pub mod grid;
pub mod level;
pub mod params;
pub mod time;
pub mod variable;

pub use bbox::BoundingBox;
pub use coordinate::Coordinate;
pub use error::{ConversionError, ConversionResult, ErrorScope};
pub use grid::{Grid, GridKind};
pub use level::{pressure_level_group, LevelKind, LevelSet, FULL_37, MODEL_LEVEL_COUNT, WEATHERBENCH_13};
pub use time::{DateRange, Schedule, TimeAxis};
pub use variable::{DataType, Variable, VariableCatalog};
