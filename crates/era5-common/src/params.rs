//! ERA5 parameter table.
//!
//! Maps short names to parameter ids (ECMWF table 128 and friends). Variable
//! declarations whose parameter id is absent from this table are rejected.

/// A known archive parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub short_name: &'static str,
    pub id: u32,
    pub description: &'static str,
    pub units: &'static str,
}

const fn param(
    short_name: &'static str,
    id: u32,
    description: &'static str,
    units: &'static str,
) -> Param {
    Param {
        short_name,
        id,
        description,
        units,
    }
}

pub static PARAMS: &[Param] = &[
    // Model level, spectral
    param("d", 155, "Divergence", "s**-1"),
    param("vo", 138, "Vorticity (relative)", "s**-1"),
    param("t", 130, "Temperature", "K"),
    param("w", 135, "Vertical velocity", "Pa s**-1"),
    param("lnsp", 152, "Logarithm of surface pressure", "~"),
    param("z", 129, "Geopotential", "m**2 s**-2"),
    // Model level, reduced Gaussian
    param("q", 133, "Specific humidity", "kg kg**-1"),
    param("o3", 203, "Ozone mass mixing ratio", "kg kg**-1"),
    param("clwc", 246, "Specific cloud liquid water content", "kg kg**-1"),
    param("ciwc", 247, "Specific cloud ice water content", "kg kg**-1"),
    param("cc", 248, "Fraction of cloud cover", "(0 - 1)"),
    param("crwc", 75, "Specific rain water content", "kg kg**-1"),
    param("cswc", 76, "Specific snow water content", "kg kg**-1"),
    // Pressure level
    param("u", 131, "U component of wind", "m s**-1"),
    param("v", 132, "V component of wind", "m s**-1"),
    param("r", 157, "Relative humidity", "%"),
    // Surface analysis
    param("sp", 134, "Surface pressure", "Pa"),
    param("tcwv", 137, "Total column vertically-integrated water vapour", "kg m**-2"),
    param("msl", 151, "Mean sea level pressure", "Pa"),
    param("tcc", 164, "Total cloud cover", "(0 - 1)"),
    param("u10", 165, "10 metre U wind component", "m s**-1"),
    param("v10", 166, "10 metre V wind component", "m s**-1"),
    param("t2m", 167, "2 metre temperature", "K"),
    param("d2m", 168, "2 metre dewpoint temperature", "K"),
    param("lcc", 186, "Low cloud cover", "(0 - 1)"),
    param("mcc", 187, "Medium cloud cover", "(0 - 1)"),
    param("hcc", 188, "High cloud cover", "(0 - 1)"),
    param("u100", 228246, "100 metre U wind component", "m s**-1"),
    param("v100", 228247, "100 metre V wind component", "m s**-1"),
    param("cape", 59, "Convective available potential energy", "J kg**-1"),
    param("siconc", 31, "Sea ice area fraction", "(0 - 1)"),
    param("sst", 34, "Sea surface temperature", "K"),
    param("skt", 235, "Skin temperature", "K"),
    param("sd", 141, "Snow depth", "m of water equivalent"),
    param("lsm", 172, "Land-sea mask", "(0 - 1)"),
    // Forecast accumulations
    param("tp", 228, "Total precipitation", "m"),
    param("cp", 143, "Convective precipitation", "m"),
    param("lsp", 142, "Large-scale precipitation", "m"),
    param("sf", 144, "Snowfall", "m of water equivalent"),
    param("ssrd", 169, "Surface solar radiation downwards", "J m**-2"),
    param("strd", 175, "Surface thermal radiation downwards", "J m**-2"),
    param("str", 177, "Surface net thermal radiation", "J m**-2"),
    param("ttr", 179, "Top net thermal radiation", "J m**-2"),
    param("tisr", 212, "TOA incident solar radiation", "J m**-2"),
];

pub fn by_id(id: u32) -> Option<&'static Param> {
    PARAMS.iter().find(|p| p.id == id)
}

pub fn by_short_name(short_name: &str) -> Option<&'static Param> {
    PARAMS.iter().find(|p| p.short_name == short_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_and_names_unique() {
        let ids: HashSet<_> = PARAMS.iter().map(|p| p.id).collect();
        let names: HashSet<_> = PARAMS.iter().map(|p| p.short_name).collect();
        assert_eq!(ids.len(), PARAMS.len());
        assert_eq!(names.len(), PARAMS.len());
    }

    #[test]
    fn test_lookup() {
        assert_eq!(by_short_name("t2m").map(|p| p.id), Some(167));
        assert_eq!(by_id(155).map(|p| p.short_name), Some("d"));
        assert!(by_id(999_999).is_none());
    }
}
