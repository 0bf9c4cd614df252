//! JSON view of the world handed to replay sinks.

use serde::{Deserialize, Serialize};

use crate::world::description::{Coordinates, StackContent};

/// The world after a round.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Column by column, `x` outer.
    pub grid_data: Vec<GridCellData>,
    /// In cell order, then arrival order.
    pub agent_data: Vec<AgentData>,
    pub top_layer_rem_data: Vec<Coordinates>,
    pub number_of_alive_agents: u32,
    pub number_of_dead_agents: u32,
    pub number_of_survivors: u32,
    pub number_of_survivors_alive: u32,
    pub number_of_survivors_dead: u32,
    pub number_of_survivors_saved_alive: u32,
    pub number_of_survivors_saved_dead: u32,
}

/// One cell.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCellData {
    /// Wire name such as `FIRE_GRID`.
    pub grid_type: String,
    pub stack: StackData,
}

/// A cell's stack, bottom first.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackData {
    pub grid_loc: Coordinates,
    pub move_cost: u32,
    pub contents: Vec<StackContent>,
}

/// One agent.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentData {
    pub id: u32,
    pub gid: u32,
    pub x: i32,
    pub y: i32,
    pub energy_level: u32,
    pub command_sent: Option<String>,
}
