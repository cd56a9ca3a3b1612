//! Variables and the immutable variable catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, ConversionResult};
use crate::grid::Grid;
use crate::level::LevelSet;
use crate::params;

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Float32,
    Float64,
}

impl DataType {
    /// Zarr V3 data type name.
    pub fn zarr_name(&self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    pub fn size(&self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }
}

/// A logical variable: one archive parameter on one grid and level set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Array name in the output store.
    pub name: String,
    pub short_name: String,
    pub param_id: u32,
    #[serde(default)]
    pub units: String,
    pub grid: Grid,
    #[serde(default)]
    pub levels: LevelSet,
    /// Configuration group the variable belongs to.
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub dtype: DataType,
}

impl Variable {
    /// Number of samples per horizontal field.
    pub fn value_count(&self) -> usize {
        self.grid.value_count()
    }

    pub fn is_single_level(&self) -> bool {
        self.levels.is_single_level()
    }

    /// Check the declaration against the parameter table and its own grid
    /// and level set.
    pub fn validate(&self) -> ConversionResult<()> {
        let param = params::by_id(self.param_id).ok_or_else(|| {
            ConversionError::configuration(format!(
                "variable {}: unknown parameter id {}",
                self.name, self.param_id
            ))
        })?;
        if param.short_name != self.short_name {
            return Err(ConversionError::configuration(format!(
                "variable {}: parameter {} is '{}', not '{}'",
                self.name, self.param_id, param.short_name, self.short_name
            )));
        }
        self.grid.validate().map_err(|e| self.qualify(e))?;
        self.levels.validate().map_err(|e| self.qualify(e))?;
        Ok(())
    }

    fn qualify(&self, err: ConversionError) -> ConversionError {
        match err {
            ConversionError::Configuration(msg) => {
                ConversionError::configuration(format!("variable {}: {}", self.name, msg))
            }
            other => other,
        }
    }
}

/// Immutable registry of variables, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct VariableCatalog {
    variables: BTreeMap<String, Arc<Variable>>,
}

impl VariableCatalog {
    /// Build a catalog, validating every variable.
    pub fn new(variables: impl IntoIterator<Item = Variable>) -> ConversionResult<Self> {
        let mut map = BTreeMap::new();
        for variable in variables {
            variable.validate()?;
            if map.contains_key(&variable.name) {
                return Err(ConversionError::configuration(format!(
                    "variable {} declared twice",
                    variable.name
                )));
            }
            map.insert(variable.name.clone(), Arc::new(variable));
        }
        Ok(Self { variables: map })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Variable>> {
        self.variables.get(name)
    }

    /// Like [`VariableCatalog::get`], as a configuration error when absent.
    pub fn require(&self, name: &str) -> ConversionResult<Arc<Variable>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| ConversionError::configuration(format!("unknown variable {}", name)))
    }

    /// Variables of one group, in name order.
    pub fn group(&self, group: &str) -> Vec<Arc<Variable>> {
        self.variables
            .values()
            .filter(|v| v.group == group)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Variable>> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
