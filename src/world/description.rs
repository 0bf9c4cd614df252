//! The world description read at startup, in the layout of the reference `.world` JSON files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::Location;
use crate::error::ConfigurationError;

/// A whole world file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldDescription {
    /// Global settings.
    pub settings: Settings,
    /// Spawn points. A location listed twice gives two slots.
    #[serde(default)]
    pub spawn_locs: Vec<SpawnLocation>,
    /// Cells that are not normal terrain.
    #[serde(default)]
    pub grid_types: GridTypes,
    /// Per-cell stacks. Cells without an entry are empty with a move cost of 1.
    #[serde(default)]
    pub stacks: Vec<Stack>,
}

/// `settings` section.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub world_info: WorldInfo,
}

/// `settings.world_info` section.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldInfo {
    pub size: WorldSize,
    /// Seed of the world's pseudo-random source.
    pub seed: u64,
    /// Starting energy of every agent.
    pub agent_energy: u32,
    #[serde(default)]
    pub world_file_levels: SurvivorLevels,
}

/// World dimensions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSize {
    pub width: i32,
    pub height: i32,
}

/// Thresholds used to bucket survivor counts in the agent world file.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivorLevels {
    pub high: u32,
    pub mid: u32,
    pub low: u32,
}

impl Default for SurvivorLevels {
    fn default() -> Self {
        SurvivorLevels {
            high: 3,
            mid: 2,
            low: 1,
        }
    }
}

/// A plain `{x, y}` pair.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
}

impl From<Coordinates> for Location {
    fn from(c: Coordinates) -> Self {
        Location::new(c.x, c.y)
    }
}

impl From<Location> for Coordinates {
    fn from(l: Location) -> Self {
        Coordinates { x: l.x, y: l.y }
    }
}

/// One spawn slot, optionally reserved for a group.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnLocation {
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// `grid_types` section.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridTypes {
    #[serde(default)]
    pub fire_grids: Vec<Coordinates>,
    #[serde(default)]
    pub killer_grids: Vec<Coordinates>,
    #[serde(default)]
    pub charging_grids: Vec<Coordinates>,
}

/// The layers of one cell, top first.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub grid_loc: Coordinates,
    #[serde(default = "default_move_cost")]
    pub move_cost: u32,
    #[serde(default)]
    pub contents: Vec<StackContent>,
}

fn default_move_cost() -> u32 {
    1
}

/// One layer: a type tag and its named arguments.
///
/// The same shape is used when a layer is exported in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackContent {
    /// Layer tag, e.g. `sv` or `Rubble`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Named integer arguments.
    #[serde(default)]
    pub arguments: BTreeMap<String, u32>,
}

impl StackContent {
    /// Builds a layer entry from a tag and `(name, value)` pairs.
    pub fn new(kind: &str, arguments: &[(&str, u32)]) -> Self {
        StackContent {
            kind: kind.to_owned(),
            arguments: arguments
                .iter()
                .map(|(name, value)| ((*name).to_owned(), *value))
                .collect(),
        }
    }
}

impl WorldDescription {
    /// Parses a world file.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// An empty world of the given size, handy to build worlds in code.
    pub fn empty(width: i32, height: i32, seed: u64, agent_energy: u32) -> Self {
        WorldDescription {
            settings: Settings {
                world_info: WorldInfo {
                    size: WorldSize { width, height },
                    seed,
                    agent_energy,
                    world_file_levels: SurvivorLevels::default(),
                },
            },
            spawn_locs: Vec::new(),
            grid_types: GridTypes::default(),
            stacks: Vec::new(),
        }
    }

    /// Adds a spawn slot.
    pub fn with_spawn(mut self, location: Location, gid: Option<u32>) -> Self {
        self.spawn_locs.push(SpawnLocation {
            x: location.x,
            y: location.y,
            gid,
        });
        self
    }

    /// Adds a stack, `contents` listed top first.
    pub fn with_stack(
        mut self,
        location: Location,
        move_cost: u32,
        contents: Vec<StackContent>,
    ) -> Self {
        self.stacks.push(Stack {
            grid_loc: location.into(),
            move_cost,
            contents,
        });
        self
    }

    /// Marks a cell as charging.
    pub fn with_charging(mut self, location: Location) -> Self {
        self.grid_types.charging_grids.push(location.into());
        self
    }

    /// Marks a cell as burning.
    pub fn with_fire(mut self, location: Location) -> Self {
        self.grid_types.fire_grids.push(location.into());
        self
    }

    /// Marks a cell as killer.
    pub fn with_killer(mut self, location: Location) -> Self {
        self.grid_types.killer_grids.push(location.into());
        self
    }
}

#[cfg(test)]
mod description_tests {
    use super::*;

    const WORLD: &str = r#"{
        "settings": {
            "world_info": {
                "size": { "width": 4, "height": 3 },
                "seed": 12345,
                "agent_energy": 100,
                "world_file_levels": { "high": 5, "mid": 3, "low": 1 }
            }
        },
        "spawn_locs": [ { "x": 0, "y": 0 }, { "x": 1, "y": 1, "gid": 2 } ],
        "grid_types": {
            "fire_grids": [ { "x": 3, "y": 2 } ],
            "killer_grids": [],
            "charging_grids": [ { "x": 0, "y": 1 } ]
        },
        "stacks": [
            {
                "grid_loc": { "x": 2, "y": 2 },
                "move_cost": 3,
                "contents": [
                    { "type": "rb", "arguments": { "remove_energy": 2, "remove_agents": 2 } },
                    { "type": "sv", "arguments": { "energy_level": 40, "damage_factor": 1, "body_mass": 2, "mental_state": 3 } }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_reference_layout() {
        let description = WorldDescription::from_json_str(WORLD).unwrap();
        let info = &description.settings.world_info;
        assert_eq!(info.size, WorldSize { width: 4, height: 3 });
        assert_eq!(info.seed, 12345);
        assert_eq!(info.world_file_levels.mid, 3);
        assert_eq!(description.spawn_locs[1].gid, Some(2));
        assert_eq!(description.spawn_locs[0].gid, None);
        assert_eq!(description.grid_types.fire_grids, vec![Coordinates { x: 3, y: 2 }]);
        let stack = &description.stacks[0];
        assert_eq!(stack.move_cost, 3);
        assert_eq!(stack.contents[0].kind, "rb");
        assert_eq!(stack.contents[1].arguments["mental_state"], 3);
    }

    #[test]
    fn missing_sections_default() {
        let description = WorldDescription::from_json_str(
            r#"{"settings":{"world_info":{"size":{"width":3,"height":3},"seed":1,"agent_energy":10}}}"#,
        )
        .unwrap();
        assert_eq!(description, WorldDescription::empty(3, 3, 1, 10));
    }

    #[test]
    fn bad_json_is_a_configuration_error() {
        assert!(matches!(
            WorldDescription::from_json_str("{"),
            Err(ConfigurationError::Json(_))
        ));
    }
}
