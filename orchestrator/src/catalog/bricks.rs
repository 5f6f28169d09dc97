//! Bricks index (`bricks-list.yaml`)

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::yaml::{scalar_list, scalar_string};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickVariable {
    pub name: String,

    #[serde(default, deserialize_with = "scalar_string")]
    pub default_value: String,

    #[serde(default)]
    pub description: String,
}

impl BrickVariable {
    /// A variable without a default must be supplied by every instance
    pub fn is_required(&self) -> bool {
        self.default_value.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brick {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub require_container: bool,

    #[serde(default)]
    pub require_model: bool,

    #[serde(default)]
    pub require_devices: bool,

    #[serde(default)]
    pub variables: Vec<BrickVariable>,

    /// Ports the brick's services publish on the host
    #[serde(default, deserialize_with = "scalar_list")]
    pub ports: Vec<String>,

    /// Default AI model
    #[serde(default)]
    pub model_name: String,
}

impl Brick {
    pub fn variable(&self, name: &str) -> Option<&BrickVariable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Read-only lookups over the catalog bricks, in file order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BricksIndex {
    #[serde(default)]
    bricks: Vec<Brick>,
}

impl BricksIndex {
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn bricks(&self) -> &[Brick] {
        &self.bricks
    }

    pub fn find_brick_by_id(&self, id: &str) -> Option<&Brick> {
        self.bricks.iter().find(|b| b.id == id)
    }
}
