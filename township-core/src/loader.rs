//! World definition loading.
//!
//! A world is one JSON or TOML document holding the location forest and the
//! personas that live in it. Loading only parses; [`WorldDefinition::validate`]
//! checks the cross references (schedule locations, homes, duplicate agents)
//! against a built [`SpatialIndex`].

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TownError};
use crate::persona::AgentPersona;
use crate::spatial::{SpatialIndex, SpatialNode};
use crate::types::AgentId;

/// Everything needed to populate a world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldDefinition {
    /// Agents, in declaration order.
    #[serde(default)]
    pub personas: Vec<AgentPersona>,
    /// Location nodes, in any order.
    #[serde(default)]
    pub locations: Vec<SpatialNode>,
}

impl WorldDefinition {
    /// Parse a JSON document.
    ///
    /// # Errors
    /// Returns [`TownError::Serialization`] on malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns [`TownError::Serialization`] on malformed input.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| TownError::Serialization(e.to_string()))
    }

    /// Read a definition from disk, picking the format by extension
    /// (`.toml` is TOML, anything else is JSON).
    ///
    /// # Errors
    /// I/O or parse failures.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let definition = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml(&content)?,
            _ => Self::from_json(&content)?,
        };
        debug!(
            path = %path.display(),
            personas = definition.personas.len(),
            locations = definition.locations.len(),
            "world definition loaded"
        );
        Ok(definition)
    }

    /// Build the spatial index for the declared locations.
    ///
    /// # Errors
    /// [`TownError::MalformedHierarchy`] if the locations are not a forest.
    pub fn build_index(&self) -> Result<SpatialIndex> {
        SpatialIndex::build(self.locations.iter().cloned())
    }

    /// Check persona cross references against `index`.
    ///
    /// Returns the ids of personas with an empty schedule; those are not a
    /// load error, the world starts them failed.
    ///
    /// # Errors
    /// [`TownError::Config`] for duplicate persona ids and
    /// [`TownError::NotFound`] for a schedule or home location that does not
    /// resolve.
    pub fn validate(&self, index: &SpatialIndex) -> Result<Vec<AgentId>> {
        let mut seen = BTreeSet::new();
        let mut unscheduled = Vec::new();
        for persona in &self.personas {
            if !seen.insert(&persona.id) {
                return Err(TownError::Config(format!("duplicate persona id {}", persona.id)));
            }
            if let Some(home) = &persona.home {
                index.resolve(home)?;
            }
            for item in &persona.schedule {
                index.resolve(&item.location)?;
            }
            if persona.schedule.is_empty() {
                warn!(agent = %persona.id, "persona has an empty schedule");
                unscheduled.push(persona.id.clone());
            }
        }
        Ok(unscheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::SpatialKind;

    const WORLD_JSON: &str = r#"{
        "locations": [
            { "id": "town", "name": "Smallville", "type": "town" },
            { "id": "home", "name": "Aiko's house", "type": "building", "parentId": "town",
              "position": { "x": 0.0, "y": 0.0 } },
            { "id": "office", "name": "Office", "type": "building", "parentId": "town",
              "position": { "x": 30.0, "y": 0.0 } }
        ],
        "personas": [
            { "id": "aiko", "name": "Aiko", "age": 29, "traits": ["curious"],
              "schedule": [
                { "time": "08:00", "activity": "sleep", "location": "home" },
                { "time": "09:00", "activity": "work", "location": "office" }
              ],
              "home": "home",
              "seedMemories": [ { "content": "I love painting", "importance": 6.0 } ] }
        ]
    }"#;

    #[test]
    fn parses_json_and_validates() {
        let def = WorldDefinition::from_json(WORLD_JSON).expect("valid json");
        assert_eq!(def.personas.len(), 1);
        assert_eq!(def.personas[0].seed_memories.len(), 1);
        assert_eq!(def.locations[1].kind, SpatialKind::Building);
        let index = def.build_index().expect("forest");
        assert!(def.validate(&index).expect("resolves").is_empty());
    }

    #[test]
    fn parses_toml() {
        let def = WorldDefinition::from_toml(
            r#"
            [[locations]]
            id = "town"
            name = "Smallville"
            type = "town"

            [[personas]]
            id = "ben"
            name = "Ben"
            age = 40
            schedule = [{ time = "07:00", activity = "walk", location = "town" }]
            "#,
        )
        .expect("valid toml");
        let index = def.build_index().expect("forest");
        assert!(def.validate(&index).expect("resolves").is_empty());
    }

    #[test]
    fn unresolved_schedule_location_fails() {
        let mut def = WorldDefinition::from_json(WORLD_JSON).expect("valid json");
        def.personas[0].schedule[1].location = "moon".into();
        let index = def.build_index().expect("forest");
        assert!(matches!(def.validate(&index), Err(TownError::NotFound { .. })));
    }

    #[test]
    fn empty_schedule_is_reported_not_fatal() {
        let mut def = WorldDefinition::from_json(WORLD_JSON).expect("valid json");
        def.personas[0].schedule.clear();
        let index = def.build_index().expect("forest");
        assert_eq!(def.validate(&index).expect("resolves"), vec![AgentId::from("aiko")]);
    }

    #[test]
    fn duplicate_personas_fail() {
        let mut def = WorldDefinition::from_json(WORLD_JSON).expect("valid json");
        def.personas.push(def.personas[0].clone());
        let index = def.build_index().expect("forest");
        assert!(matches!(def.validate(&index), Err(TownError::Config(_))));
    }

    #[test]
    fn reads_from_disk_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("world.json");
        std::fs::write(&path, WORLD_JSON).expect("write");
        let def = WorldDefinition::from_file(&path).expect("loads");
        assert_eq!(def.personas[0].name, "Aiko");
    }
}
