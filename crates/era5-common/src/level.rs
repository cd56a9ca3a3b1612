//! Vertical coordinates.

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, ConversionResult};

/// Number of hybrid sigma-pressure model levels.
pub const MODEL_LEVEL_COUNT: u32 = 137;

/// The 37 standard pressure levels in hPa.
pub const FULL_37: [u32; 37] = [
    1, 2, 3, 5, 7, 10, 20, 30, 50, 70, 100, 125, 150, 175, 200, 225, 250, 300, 350, 400, 450,
    500, 550, 600, 650, 700, 750, 775, 800, 825, 850, 875, 900, 925, 950, 975, 1000,
];

/// The 13-level subset used by common benchmark datasets.
pub const WEATHERBENCH_13: [u32; 13] = [
    50, 100, 150, 200, 250, 300, 400, 500, 600, 700, 850, 925, 1000,
];

/// Look up a named pressure level group.
pub fn pressure_level_group(name: &str) -> Option<&'static [u32]> {
    match name {
        "full_37" => Some(&FULL_37),
        "weatherbench_13" => Some(&WEATHERBENCH_13),
        _ => None,
    }
}

/// Kind of vertical coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Surface,
    Model,
    Pressure,
}

impl LevelKind {
    /// Name of the vertical dimension and its coordinate array.
    pub fn dimension_name(&self) -> Option<&'static str> {
        match self {
            LevelKind::Surface => None,
            LevelKind::Model => Some("hybrid"),
            LevelKind::Pressure => Some("level"),
        }
    }
}

/// Ordered set of levels a variable is defined on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSet {
    pub kind: LevelKind,
    #[serde(default)]
    pub levels: Vec<u32>,
}

impl Default for LevelSet {
    fn default() -> Self {
        Self::surface()
    }
}

impl LevelSet {
    pub fn surface() -> Self {
        Self {
            kind: LevelKind::Surface,
            levels: Vec::new(),
        }
    }

    /// All model levels, 1..=137.
    pub fn all_model_levels() -> Self {
        Self {
            kind: LevelKind::Model,
            levels: (1..=MODEL_LEVEL_COUNT).collect(),
        }
    }

    pub fn pressure(levels: &[u32]) -> Self {
        Self {
            kind: LevelKind::Pressure,
            levels: levels.to_vec(),
        }
    }

    pub fn is_single_level(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn contains(&self, level: u32) -> bool {
        self.levels.contains(&level)
    }

    /// Position of a level along the vertical axis.
    pub fn index_of(&self, level: u32) -> Option<usize> {
        self.levels.iter().position(|&l| l == level)
    }

    /// Restrict to the given levels, keeping this set's order.
    ///
    /// Every requested level must be present.
    pub fn subset(&self, levels: &[u32]) -> ConversionResult<LevelSet> {
        if let Some(missing) = levels.iter().find(|l| !self.contains(**l)) {
            return Err(ConversionError::configuration(format!(
                "level {} is not part of the level set",
                missing
            )));
        }
        Ok(LevelSet {
            kind: self.kind,
            levels: self
                .levels
                .iter()
                .copied()
                .filter(|l| levels.contains(l))
                .collect(),
        })
    }

    /// Check every level is defined for the level kind.
    pub fn validate(&self) -> ConversionResult<()> {
        match self.kind {
            LevelKind::Surface => {
                if !self.levels.is_empty() {
                    return Err(ConversionError::configuration(
                        "single-level variables take no levels",
                    ));
                }
            }
            LevelKind::Model => {
                if let Some(bad) = self
                    .levels
                    .iter()
                    .find(|l| **l == 0 || **l > MODEL_LEVEL_COUNT)
                {
                    return Err(ConversionError::configuration(format!(
                        "model level {} outside 1..={}",
                        bad, MODEL_LEVEL_COUNT
                    )));
                }
            }
            LevelKind::Pressure => {
                if let Some(bad) = self.levels.iter().find(|l| !FULL_37.contains(l)) {
                    return Err(ConversionError::configuration(format!(
                        "pressure level {} hPa is not a standard level",
                        bad
                    )));
                }
            }
        }
        if self.kind != LevelKind::Surface && self.levels.is_empty() {
            return Err(ConversionError::configuration(format!(
                "{:?} level set is empty",
                self.kind
            )));
        }
        if self.levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConversionError::configuration(
                "levels must be strictly ascending",
            ));
        }
        Ok(())
    }
}
