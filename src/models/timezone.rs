use chrono::{Local, Offset};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::error::DefinitionError;

/// Static description of one timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimezoneDefinition {
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "alt", default, skip_serializing_if = "Option::is_none")]
    pub alternate_id: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

/// `{ "data": { id: definition }, "abbr": { alias: id } }`
#[derive(Debug, Deserialize)]
struct DefinitionDocument {
    data: HashMap<String, TimezoneDefinition>,
    #[serde(default)]
    abbr: HashMap<String, String>,
}

/// Immutable lookup over the loaded definitions, by id or alias.
#[derive(Debug, Clone, Default)]
pub struct TimezoneRegistry {
    definitions: HashMap<String, TimezoneDefinition>,
    aliases: HashMap<String, String>,
}

impl TimezoneRegistry {
    pub fn from_json(text: &str) -> Result<Self, DefinitionError> {
        let document: DefinitionDocument = serde_json::from_str(text)?;
        let definitions = document
            .data
            .into_iter()
            .map(|(id, mut definition)| {
                definition.id = id.clone();
                (id, definition)
            })
            .collect();
        Ok(Self {
            definitions,
            aliases: document.abbr,
        })
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn lookup(&self, id: &str) -> Option<&TimezoneDefinition> {
        self.definitions.get(id).or_else(|| {
            self.aliases
                .get(id)
                .and_then(|target| self.definitions.get(target))
        })
    }

    /// Resolve the local zone, falling back to the `+480_CST` style
    /// abbreviation key (offset in minutes, then the raw id).
    pub fn local_timezone(&self, zone: &LocalZone) -> Option<&TimezoneDefinition> {
        self.lookup(&zone.id)
            .or_else(|| self.lookup(&format!("{:+04}_{}", zone.offset_minutes, zone.id)))
    }
}

/// The local peer's timezone as detected on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalZone {
    pub id: String,
    pub offset_minutes: i32,
}

impl LocalZone {
    pub fn new(id: impl Into<String>, offset_minutes: i32) -> Self {
        Self {
            id: id.into(),
            offset_minutes,
        }
    }

    /// Detect from the system clock. Without an explicit id, an `Etc/GMT`
    /// style id is derived from the current whole-hour offset.
    pub fn detect(id_override: Option<&str>) -> Self {
        let offset_minutes = Local::now().offset().fix().local_minus_utc() / 60;
        let id = match id_override {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => etc_gmt_id(offset_minutes),
        };
        Self { id, offset_minutes }
    }

    /// Canonical id according to the registry, when it knows this zone.
    pub fn canonicalize(&self, registry: &TimezoneRegistry) -> Self {
        match registry.local_timezone(self) {
            Some(definition) => Self::new(definition.id.clone(), self.offset_minutes),
            None => self.clone(),
        }
    }
}

fn etc_gmt_id(offset_minutes: i32) -> String {
    let hours = offset_minutes / 60;
    if hours == 0 {
        "Etc/GMT".to_string()
    } else {
        format!("Etc/GMT{:+}", hours)
    }
}
