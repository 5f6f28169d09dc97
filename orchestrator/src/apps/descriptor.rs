//! The `app.yaml` descriptor model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::apps::arduino_app::brick_rel_path;
use crate::errors::{OrchestratorError, Result};
use crate::yaml::scalar_map;

/// An app's concrete use of a catalog brick.
///
/// In YAML a brick item is either a bare id (`- arduino:dbstorage`) or a
/// single-key map from the id to optional details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBrickInstance", into = "RawBrickInstance")]
pub struct BrickInstance {
    pub id: String,
    pub model: Option<String>,
    pub variables: BTreeMap<String, String>,
}

impl BrickInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: None,
            variables: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BrickDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawBrickInstance {
    Id(String),
    Detailed(BTreeMap<String, Option<BrickDetails>>),
}

impl TryFrom<RawBrickInstance> for BrickInstance {
    type Error = String;

    fn try_from(raw: RawBrickInstance) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawBrickInstance::Id(id) => Ok(BrickInstance::new(id)),
            RawBrickInstance::Detailed(map) => {
                if map.len() != 1 {
                    return Err(format!(
                        "expected single-key map for brick item, got {} keys",
                        map.len()
                    ));
                }
                let Some((id, details)) = map.into_iter().next() else {
                    return Err("expected single-key map for brick item".to_string());
                };
                let details = details.unwrap_or_default();
                Ok(BrickInstance {
                    id,
                    model: details.model.filter(|m| !m.is_empty()),
                    variables: details.variables,
                })
            }
        }
    }
}

impl From<BrickInstance> for RawBrickInstance {
    fn from(brick: BrickInstance) -> Self {
        if brick.model.is_none() && brick.variables.is_empty() {
            return RawBrickInstance::Id(brick.id);
        }
        let details = BrickDetails {
            model: brick.model,
            variables: brick.variables,
        };
        RawBrickInstance::Detailed(BTreeMap::from([(brick.id, Some(details))]))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// TCP ports exposed by the main process, mapped 1:1 on the host
    #[serde(default)]
    pub ports: Vec<u16>,

    #[serde(default)]
    pub bricks: Vec<BrickInstance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_devices: Vec<String>,
}

impl AppDescriptor {
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Err(OrchestratorError::InvalidApp(
                "application name is empty".to_string(),
            ));
        }
        let descriptor: AppDescriptor = serde_yaml::from_str(contents)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidApp(
                "application name is empty".to_string(),
            ));
        }
        if let Some(icon) = &self.icon {
            if !icon.is_empty() && !is_single_emoji(icon) {
                return Err(OrchestratorError::InvalidApp(format!(
                    "icon {:?} is not a valid single emoji",
                    icon
                )));
            }
        }
        for brick in &self.bricks {
            brick_rel_path(&brick.id)?;
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn brick(&self, id: &str) -> Option<&BrickInstance> {
        self.bricks.iter().find(|b| b.id == id)
    }
}

const ZWJ: char = '\u{200D}';
const KEYCAP: char = '\u{20E3}';

fn is_variation_selector(c: char) -> bool {
    ('\u{FE00}'..='\u{FE0F}').contains(&c)
}

fn is_skin_tone(c: char) -> bool {
    ('\u{1F3FB}'..='\u{1F3FF}').contains(&c)
}

fn is_tag(c: char) -> bool {
    ('\u{E0020}'..='\u{E007F}').contains(&c)
}

fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

fn is_emoji_base(c: char) -> bool {
    matches!(c as u32,
        0x00A9 | 0x00AE | 0x203C | 0x2049 | 0x2122 | 0x2139 | 0x3030 | 0x303D | 0x3297 | 0x3299
        | 0x2194..=0x21AA
        | 0x2300..=0x23FF
        | 0x24C2
        | 0x25AA..=0x25FE
        | 0x2600..=0x27BF
        | 0x2934..=0x2935
        | 0x2B05..=0x2B55
        | 0x1F000..=0x1FAFF)
}

/// True when `s` renders as exactly one emoji. Joiner sequences, skin tones,
/// flags and keycaps count as one; variation selectors are ignored.
fn is_single_emoji(s: &str) -> bool {
    let mut emojis = 0;
    let mut after_joiner = false;
    let mut pending_flag = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if is_variation_selector(c) || is_skin_tone(c) || is_tag(c) || c == KEYCAP {
            if emojis == 0 && c == KEYCAP {
                return false;
            }
            continue;
        }
        if c == ZWJ {
            after_joiner = true;
            continue;
        }
        if is_regional_indicator(c) {
            if pending_flag {
                pending_flag = false;
                continue;
            }
            pending_flag = true;
            emojis += 1;
            continue;
        }
        if c.is_ascii_digit() || c == '#' || c == '*' {
            // keycap sequences: digit, optional selector, combining keycap
            let is_keycap = chars.clone().find(|n| !is_variation_selector(*n)) == Some(KEYCAP);
            if !is_keycap {
                return false;
            }
            emojis += 1;
            continue;
        }
        if !is_emoji_base(c) {
            return false;
        }
        if after_joiner {
            after_joiner = false;
            continue;
        }
        emojis += 1;
    }
    emojis == 1 && !after_joiner
}
