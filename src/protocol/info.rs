//! Observation payloads carried by the result commands.

use std::fmt;

use crate::common::{AgentId, Direction, GridKind, IdList, LifeSignals, Location};

/// What an agent learns about the top layer of a cell.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectInfo {
    /// Rubble that needs `remove_agents` diggers, each paying `remove_energy`.
    Rubble {
        id: u32,
        remove_agents: u32,
        remove_energy: u32,
    },
    /// A single survivor.
    Survivor {
        id: u32,
        energy: u32,
        damage_factor: u32,
        body_mass: u32,
        mental_state: u32,
    },
    /// Several survivors sharing one energy pool.
    SurvivorGroup {
        id: u32,
        number_of_survivors: u32,
        energy: u32,
    },
    /// The stack is empty.
    NoLayers,
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectInfo::Rubble {
                id,
                remove_agents,
                remove_energy,
            } => write!(
                f,
                "RUBBLE ( ID {id} , NUM_TO_RM {remove_agents} , RM_ENG {remove_energy} )"
            ),
            ObjectInfo::Survivor {
                id,
                energy,
                damage_factor,
                body_mass,
                mental_state,
            } => write!(
                f,
                "SURVIVOR ( ID {id} , ENG_LEV {energy} , DMG_FAC {damage_factor} , BDM {body_mass} , MS {mental_state} )"
            ),
            ObjectInfo::SurvivorGroup {
                id,
                number_of_survivors,
                energy,
            } => write!(
                f,
                "SURVIVOR_GROUP ( ID {id} , NUM_SV {number_of_survivors} , ENG_LV {energy} )"
            ),
            ObjectInfo::NoLayers => f.write_str("NO_LAYERS"),
        }
    }
}

/// A single cell as seen by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GridInfo {
    /// Off the map.
    #[default]
    NoGrid,
    /// An existing cell.
    Grid(CellInfo),
}

/// Body of [`GridInfo::Grid`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellInfo {
    pub kind: GridKind,
    pub location: Location,
    pub on_fire: bool,
    pub move_cost: u32,
    /// Agents standing on the cell.
    pub agents: Vec<AgentId>,
    pub top_layer: ObjectInfo,
}

impl fmt::Display for GridInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridInfo::NoGrid => f.write_str("NO_GRID"),
            GridInfo::Grid(cell) => write!(
                f,
                "{} ( X {} , Y {} , ON_FIRE {} , MV_COST {} , NUM_AGT {} , ID_LIST {} , TOP_LAYER ( {} ) )",
                cell.kind.name(),
                cell.location.x,
                cell.location.y,
                bool_str(cell.on_fire),
                cell.move_cost,
                cell.agents.len(),
                IdList(&cell.agents),
                cell.top_layer
            ),
        }
    }
}

/// Current cell, its life signals and the eight neighbours.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurroundInfo {
    pub current: GridInfo,
    pub life_signals: LifeSignals,
    /// Indexed like [`Direction::COMPASS`].
    pub neighbours: [GridInfo; 8],
}

impl SurroundInfo {
    /// The neighbour in `direction`. `Center` gives the current cell.
    pub fn get(&self, direction: Direction) -> &GridInfo {
        match Direction::COMPASS.iter().position(|d| *d == direction) {
            Some(i) => &self.neighbours[i],
            None => &self.current,
        }
    }
}

impl fmt::Display for SurroundInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CURR_GRID ( {} ) , NUM_SIG {} , LIFE_SIG {}",
            self.current,
            self.life_signals.len(),
            self.life_signals
        )?;
        for (direction, info) in Direction::COMPASS.iter().zip(&self.neighbours) {
            write!(f, " , {direction} ( {info} )")?;
        }
        Ok(())
    }
}

pub(crate) fn bool_str(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}
