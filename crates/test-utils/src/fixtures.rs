//! Common test fixtures: variables on small grids and date ranges.
//!
//! Grids are kept coarse so whole stores fit comfortably in memory.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use era5_common::{DataType, DateRange, Grid, LevelSet, Variable};

/// Grids used across the test suite.
pub mod grids {
    use era5_common::Grid;

    /// 45° regular global grid, 5 x 8.
    pub fn coarse_regular() -> Grid {
        Grid::regular_global(45.0)
    }

    /// 30° regular global grid, 7 x 12.
    pub fn regular_30() -> Grid {
        Grid::regular_global(30.0)
    }

    /// Octahedral O4: 8 rows, 208 points.
    pub fn octahedral_o4() -> Grid {
        Grid::octahedral(4)
    }

    /// Spectral truncation T7: 72 coefficients.
    pub fn spectral_t7() -> Grid {
        Grid::SpectralHarmonic { truncation: 7 }
    }
}

/// Build a variable with defaults for the fields tests rarely care about.
pub fn variable(
    name: &str,
    short_name: &str,
    param_id: u32,
    grid: Grid,
    levels: LevelSet,
    group: &str,
) -> Variable {
    Variable {
        name: name.to_string(),
        short_name: short_name.to_string(),
        param_id,
        units: era5_common::params::by_id(param_id)
            .map(|p| p.units.to_string())
            .unwrap_or_default(),
        grid,
        levels,
        group: group.to_string(),
        dtype: DataType::Float32,
    }
}

/// 2 metre temperature on the coarse regular grid.
pub fn t2m() -> Variable {
    variable("t2m", "t2m", 167, grids::coarse_regular(), LevelSet::surface(), "sfc")
}

/// Mean sea level pressure on the coarse regular grid.
pub fn msl() -> Variable {
    variable("msl", "msl", 151, grids::coarse_regular(), LevelSet::surface(), "sfc")
}

/// Total precipitation, a forecast accumulation.
pub fn tp() -> Variable {
    variable("tp", "tp", 228, grids::coarse_regular(), LevelSet::surface(), "pcp")
}

/// Specific humidity on O4 at three pressure levels.
pub fn humidity() -> Variable {
    variable(
        "specific_humidity",
        "q",
        133,
        grids::octahedral_o4(),
        LevelSet::pressure(&[500, 850, 1000]),
        "pl",
    )
}

/// Temperature as spectral coefficients at two pressure levels.
pub fn spectral_temperature() -> Variable {
    variable(
        "temperature",
        "t",
        130,
        grids::spectral_t7(),
        LevelSet::pressure(&[500, 850]),
        "tw",
    )
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// Inclusive range of `days` days starting 2020-01-01.
pub fn days_from_2020(days: u32) -> DateRange {
    DateRange::new(date(2020, 1, 1), date(2020, 1, days))
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid test time")
}
