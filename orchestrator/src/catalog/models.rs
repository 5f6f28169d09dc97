//! AI models index (`models-list.yaml`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::yaml::scalar_map;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiModel {
    /// Key of the model entry in the list
    #[serde(skip_deserializing)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub runner: String,

    /// Bricks able to run this model
    #[serde(default)]
    pub bricks: Vec<String>,

    #[serde(default)]
    pub model_labels: Vec<String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub metadata: BTreeMap<String, String>,

    /// Environment overrides applied when an instance selects this model
    #[serde(default, deserialize_with = "scalar_map")]
    pub model_configuration: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawModelsList {
    #[serde(default)]
    models: Vec<BTreeMap<String, AiModel>>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelsIndex {
    models: Vec<AiModel>,
}

impl ModelsIndex {
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawModelsList = serde_yaml::from_str(contents)?;
        let models = raw
            .models
            .into_iter()
            .flat_map(|entry| entry.into_iter())
            .map(|(id, mut model)| {
                model.id = id;
                model
            })
            .collect();
        Ok(Self { models })
    }

    pub fn models(&self) -> &[AiModel] {
        &self.models
    }

    pub fn get_model_by_id(&self, id: &str) -> Option<&AiModel> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn get_models_by_brick(&self, brick_id: &str) -> Vec<&AiModel> {
        self.models
            .iter()
            .filter(|m| m.bricks.iter().any(|b| b == brick_id))
            .collect()
    }

    /// Models usable by at least one of `brick_ids`
    pub fn get_models_by_bricks(&self, brick_ids: &[&str]) -> Vec<&AiModel> {
        self.models
            .iter()
            .filter(|m| m.bricks.iter().any(|b| brick_ids.contains(&b.as_str())))
            .collect()
    }
}
