//! Objects stacked on cells.

use tracing::warn;

use crate::common::Location;
use crate::error::ConfigurationError;
use crate::protocol::info::ObjectInfo;
use crate::world::description::StackContent;

/// Kind of a stacked object.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Rubble,
    Survivor,
    SurvivorGroup,
}

/// Tags accepted in world descriptions, compared case-insensitively.
const LAYER_TAGS: &[(&str, LayerKind)] = &[
    ("rb", LayerKind::Rubble),
    ("rubble", LayerKind::Rubble),
    ("sv", LayerKind::Survivor),
    ("survivor", LayerKind::Survivor),
    ("svg", LayerKind::SurvivorGroup),
    ("survivorgroup", LayerKind::SurvivorGroup),
];

impl LayerKind {
    /// Looks a description tag up.
    pub fn from_tag(tag: &str) -> Option<LayerKind> {
        LAYER_TAGS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(tag))
            .map(|(_, kind)| *kind)
    }

    /// Short tag used in snapshots.
    pub fn tag(self) -> &'static str {
        match self {
            LayerKind::Rubble => "rb",
            LayerKind::Survivor => "sv",
            LayerKind::SurvivorGroup => "svg",
        }
    }

    fn argument_names(self) -> &'static [&'static str] {
        match self {
            LayerKind::Rubble => &["remove_energy", "remove_agents"],
            LayerKind::Survivor => &["energy_level", "damage_factor", "body_mass", "mental_state"],
            LayerKind::SurvivorGroup => &["energy_level", "number_of_survivors"],
        }
    }
}

/// Key of an object in the world's object table. Orders by kind, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerRef {
    /// Kind of the object.
    pub kind: LayerKind,
    /// Id, counted per kind from 0.
    pub id: u32,
}

/// Debris that has to be dug away by enough agents at once.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubble {
    pub id: u32,
    /// Energy each digger pays when the rubble goes.
    pub remove_energy: u32,
    /// Diggers needed.
    pub remove_agents: u32,
}

/// A single survivor.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Survivor {
    pub id: u32,
    pub energy: u32,
    pub damage_factor: u32,
    pub body_mass: u32,
    pub mental_state: u32,
}

/// Survivors sharing one energy pool.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurvivorGroup {
    pub id: u32,
    pub energy: u32,
    pub number_of_survivors: u32,
}

/// Anything that can sit in a cell's stack.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldObject {
    Rubble(Rubble),
    Survivor(Survivor),
    SurvivorGroup(SurvivorGroup),
}

/// Outcome of rescuing a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rescued {
    /// Individuals in the layer.
    pub count: u32,
    /// Whether they were still alive.
    pub alive: bool,
}

impl WorldObject {
    /// Builds an object from a description entry.
    ///
    /// Returns `Ok(None)` for an unknown tag, which is only worth a warning.
    pub fn from_content(
        content: &StackContent,
        id: impl FnOnce(LayerKind) -> u32,
        location: Location,
    ) -> Result<Option<WorldObject>, ConfigurationError> {
        let Some(kind) = LayerKind::from_tag(&content.kind) else {
            warn!(tag = content.kind.as_str(), %location, "unknown layer tag, skipped");
            return Ok(None);
        };

        let names = kind.argument_names();
        let values: Vec<u32> = names
            .iter()
            .filter_map(|name| content.arguments.get(*name).copied())
            .collect();
        if values.len() != names.len() {
            return Err(ConfigurationError::MissingArguments {
                tag: content.kind.clone(),
                location,
                expected: names.len(),
                got: values.len(),
            });
        }

        let id = id(kind);
        Ok(Some(match kind {
            LayerKind::Rubble => WorldObject::Rubble(Rubble {
                id,
                remove_energy: values[0],
                remove_agents: values[1],
            }),
            LayerKind::Survivor => WorldObject::Survivor(Survivor {
                id,
                energy: values[0],
                damage_factor: values[1],
                body_mass: values[2],
                mental_state: values[3],
            }),
            LayerKind::SurvivorGroup => WorldObject::SurvivorGroup(SurvivorGroup {
                id,
                energy: values[0],
                number_of_survivors: values[1],
            }),
        }))
    }

    /// Table key of this object.
    pub fn layer_ref(&self) -> LayerRef {
        match self {
            WorldObject::Rubble(r) => LayerRef {
                kind: LayerKind::Rubble,
                id: r.id,
            },
            WorldObject::Survivor(s) => LayerRef {
                kind: LayerKind::Survivor,
                id: s.id,
            },
            WorldObject::SurvivorGroup(g) => LayerRef {
                kind: LayerKind::SurvivorGroup,
                id: g.id,
            },
        }
    }

    /// What agents see of it.
    pub fn info(&self) -> ObjectInfo {
        match self {
            WorldObject::Rubble(r) => ObjectInfo::Rubble {
                id: r.id,
                remove_agents: r.remove_agents,
                remove_energy: r.remove_energy,
            },
            WorldObject::Survivor(s) => ObjectInfo::Survivor {
                id: s.id,
                energy: s.energy,
                damage_factor: s.damage_factor,
                body_mass: s.body_mass,
                mental_state: s.mental_state,
            },
            WorldObject::SurvivorGroup(g) => ObjectInfo::SurvivorGroup {
                id: g.id,
                number_of_survivors: g.number_of_survivors,
                energy: g.energy,
            },
        }
    }

    /// Undistorted life signal.
    pub fn life_signal(&self) -> u32 {
        match self {
            WorldObject::Rubble(_) => 0,
            WorldObject::Survivor(s) => s
                .energy
                .saturating_sub(s.damage_factor)
                .saturating_sub(s.mental_state),
            WorldObject::SurvivorGroup(g) => g.energy,
        }
    }

    /// The survivors inside, `None` for rubble.
    pub fn rescued(&self) -> Option<Rescued> {
        match self {
            WorldObject::Rubble(_) => None,
            WorldObject::Survivor(s) => Some(Rescued {
                count: 1,
                alive: s.energy > 0,
            }),
            WorldObject::SurvivorGroup(g) => Some(Rescued {
                count: g.number_of_survivors,
                alive: g.energy > 0,
            }),
        }
    }

    /// Snapshot form, same shape as the description.
    pub fn content(&self) -> StackContent {
        match self {
            WorldObject::Rubble(r) => StackContent::new(
                LayerKind::Rubble.tag(),
                &[
                    ("remove_energy", r.remove_energy),
                    ("remove_agents", r.remove_agents),
                ],
            ),
            WorldObject::Survivor(s) => StackContent::new(
                LayerKind::Survivor.tag(),
                &[
                    ("energy_level", s.energy),
                    ("damage_factor", s.damage_factor),
                    ("body_mass", s.body_mass),
                    ("mental_state", s.mental_state),
                ],
            ),
            WorldObject::SurvivorGroup(g) => StackContent::new(
                LayerKind::SurvivorGroup.tag(),
                &[
                    ("energy_level", g.energy),
                    ("number_of_survivors", g.number_of_survivors),
                ],
            ),
        }
    }
}

#[cfg(test)]
mod layer_tests {
    use super::*;

    fn content(tag: &str, args: &[(&str, u32)]) -> StackContent {
        StackContent::new(tag, args)
    }

    #[test]
    fn tags_match_in_any_case() {
        assert_eq!(LayerKind::from_tag("RB"), Some(LayerKind::Rubble));
        assert_eq!(LayerKind::from_tag("Survivor"), Some(LayerKind::Survivor));
        assert_eq!(LayerKind::from_tag("SurvivorGroup"), Some(LayerKind::SurvivorGroup));
        assert_eq!(LayerKind::from_tag("svgx"), None);
    }

    #[test]
    fn builds_from_named_arguments() {
        let object = WorldObject::from_content(
            &content(
                "SV",
                &[
                    ("mental_state", 3),
                    ("energy_level", 10),
                    ("body_mass", 2),
                    ("damage_factor", 4),
                ],
            ),
            |_| 7,
            Location::new(0, 0),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            object,
            WorldObject::Survivor(Survivor {
                id: 7,
                energy: 10,
                damage_factor: 4,
                body_mass: 2,
                mental_state: 3,
            })
        );
        assert_eq!(object.life_signal(), 3);
    }

    #[test]
    fn unknown_tag_is_skipped() {
        let object =
            WorldObject::from_content(&content("crate", &[]), |_| 0, Location::new(1, 1)).unwrap();
        assert!(object.is_none());
    }

    #[test]
    fn missing_argument_is_an_error() {
        let err = WorldObject::from_content(
            &content("rubble", &[("remove_energy", 1)]),
            |_| 0,
            Location::new(2, 1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingArguments {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn life_signal_floors_each_step() {
        let survivor = WorldObject::Survivor(Survivor {
            id: 0,
            energy: 5,
            damage_factor: 8,
            body_mass: 0,
            mental_state: 0,
        });
        assert_eq!(survivor.life_signal(), 0);
        let group = WorldObject::SurvivorGroup(SurvivorGroup {
            id: 0,
            energy: 12,
            number_of_survivors: 3,
        });
        assert_eq!(group.life_signal(), 12);
        assert_eq!(
            group.rescued(),
            Some(Rescued {
                count: 3,
                alive: true
            })
        );
    }

    #[test]
    fn refs_order_by_kind_then_id() {
        let a = LayerRef {
            kind: LayerKind::Survivor,
            id: 9,
        };
        let b = LayerRef {
            kind: LayerKind::SurvivorGroup,
            id: 0,
        };
        assert!(a < b);
    }
}
