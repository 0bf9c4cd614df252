//! World state: the grid, the stacked objects and where the agents stand.
//!
//! The world owns every object in one table keyed by [`LayerRef`]; cells only hold keys.
//! It also owns the pseudo-random source, seeded from the description, so a run is
//! reproducible from its world file alone.

mod agent;
mod cell;
pub mod description;
pub mod layer;
pub mod snapshot;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument, warn};

pub use agent::Agent;
pub use cell::Cell;

use crate::common::{
    AgentId, Direction, GridKind, LifeSignals, Location, DEPTH_HIGH_INC, DEPTH_HIGH_START,
    DEPTH_LOW_INC, DEPTH_LOW_START, WORLD_MAX, WORLD_MIN,
};
use crate::error::ConfigurationError;
use crate::protocol::info::{CellInfo, GridInfo, ObjectInfo, SurroundInfo};
use description::{SurvivorLevels, WorldDescription};
use layer::{LayerKind, LayerRef, Rescued, WorldObject};
use snapshot::{AgentData, GridCellData, StackData, WorldSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SpawnSlot {
    location: Location,
    gid: Option<u32>,
    remaining: u32,
}

/// Counters exported with every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldCounters {
    /// Agents currently in the world.
    pub alive_agents: u32,
    /// Agents the grim reaper collected so far.
    pub dead_agents: u32,
    /// Individuals present at build time.
    pub survivors: u32,
    /// Of those, alive at build time.
    pub survivors_alive: u32,
    /// Of those, dead at build time.
    pub survivors_dead: u32,
    /// Rescued while alive.
    pub saved_alive: u32,
    /// Rescued after dying.
    pub saved_dead: u32,
}

/// The simulated world.
#[derive(Debug)]
pub struct AegisWorld {
    width: i32,
    height: i32,
    /// Indexed by `x * height + y`.
    cells: Vec<Cell>,
    /// In the order they were added.
    agents: Vec<Agent>,
    pub(crate) objects: BTreeMap<LayerRef, WorldObject>,
    spawns: Vec<SpawnSlot>,
    stable_cells: Vec<Location>,
    pub(crate) top_layer_removed: Vec<Location>,
    initial_agent_energy: u32,
    levels: SurvivorLevels,
    move_cost_enabled: bool,
    pub(crate) counters: WorldCounters,
    pub(crate) rng: SmallRng,
}

impl AegisWorld {
    /// Builds and validates a world.
    ///
    /// With `move_cost_enabled` off every cell costs 1 to enter whatever the description says.
    #[instrument(skip_all, fields(seed = description.settings.world_info.seed))]
    pub fn build(
        description: &WorldDescription,
        move_cost_enabled: bool,
    ) -> Result<AegisWorld, ConfigurationError> {
        let world_info = &description.settings.world_info;
        let (width, height) = (world_info.size.width, world_info.size.height);
        let valid = WORLD_MIN..=WORLD_MAX;
        if !valid.contains(&width) || !valid.contains(&height) {
            return Err(ConfigurationError::WorldSize {
                width,
                height,
                min: WORLD_MIN,
                max: WORLD_MAX,
            });
        }

        let cells = (0..width)
            .flat_map(|x| (0..height).map(move |y| Cell::new(Location::new(x, y))))
            .collect();
        let mut world = AegisWorld {
            width,
            height,
            cells,
            agents: Vec::new(),
            objects: BTreeMap::new(),
            spawns: Vec::new(),
            stable_cells: Vec::new(),
            top_layer_removed: Vec::new(),
            initial_agent_energy: world_info.agent_energy,
            levels: world_info.world_file_levels,
            move_cost_enabled,
            counters: WorldCounters::default(),
            rng: SmallRng::seed_from_u64(world_info.seed),
        };

        for spawn in &description.spawn_locs {
            let location = Location::new(spawn.x, spawn.y);
            world.checked_cell(location, "spawn location")?;
            match world
                .spawns
                .iter_mut()
                .find(|s| s.location == location && s.gid == spawn.gid)
            {
                Some(slot) => slot.remaining += 1,
                None => world.spawns.push(SpawnSlot {
                    location,
                    gid: spawn.gid,
                    remaining: 1,
                }),
            }
        }

        // later lists win: fire over killer over charging
        let grid_types = &description.grid_types;
        for (what, list, kind) in [
            ("charging grid", &grid_types.charging_grids, GridKind::Charging),
            ("killer grid", &grid_types.killer_grids, GridKind::Killer),
            ("fire grid", &grid_types.fire_grids, GridKind::Fire),
        ] {
            for c in list {
                world.checked_cell(Location::new(c.x, c.y), what)?.kind = kind;
            }
        }

        let mut next_ids: BTreeMap<LayerKind, u32> = BTreeMap::new();
        for stack in &description.stacks {
            let location = stack.grid_loc.into();
            world.checked_cell(location, "stack")?;
            let mut layers = Vec::with_capacity(stack.contents.len());
            // listed top first
            for content in &stack.contents {
                let object = WorldObject::from_content(
                    content,
                    |kind| {
                        let next = next_ids.entry(kind).or_insert(0);
                        *next += 1;
                        *next - 1
                    },
                    location,
                )?;
                if let Some(object) = object {
                    if let Some(Rescued { count, alive }) = object.rescued() {
                        world.counters.survivors += count;
                        if alive {
                            world.counters.survivors_alive += count;
                        } else {
                            world.counters.survivors_dead += count;
                        }
                    }
                    let key = object.layer_ref();
                    world.objects.insert(key, object);
                    layers.push(key);
                }
            }
            layers.reverse();

            let cell = world.checked_cell(location, "stack")?;
            cell.move_cost = if move_cost_enabled { stack.move_cost } else { 1 };
            cell.layers.extend(layers);
        }

        world.stable_cells = world
            .cells
            .iter()
            .filter(|c| c.is_stable())
            .map(|c| c.location)
            .collect();

        info!(
            width,
            height,
            survivors = world.counters.survivors,
            objects = world.objects.len(),
            "world built"
        );
        Ok(world)
    }

    fn index(&self, location: Location) -> Option<usize> {
        self.on_map(location)
            .then(|| (location.x * self.height + location.y) as usize)
    }

    fn checked_cell(
        &mut self,
        location: Location,
        what: &'static str,
    ) -> Result<&mut Cell, ConfigurationError> {
        match self.index(location) {
            Some(i) => Ok(&mut self.cells[i]),
            None => Err(ConfigurationError::OffMap { what, location }),
        }
    }

    /// Columns.
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Rows.
    pub fn height(&self) -> i32 {
        self.height
    }

    /// True when `location` is a cell of this world.
    pub fn on_map(&self, location: Location) -> bool {
        (0..self.width).contains(&location.x) && (0..self.height).contains(&location.y)
    }

    /// The cell at `location`.
    pub fn cell(&self, location: Location) -> Option<&Cell> {
        self.index(location).map(|i| &self.cells[i])
    }

    pub(crate) fn cell_mut(&mut self, location: Location) -> Option<&mut Cell> {
        self.index(location).map(move |i| &mut self.cells[i])
    }

    /// Every cell, `x` outer.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Energy every agent starts with.
    pub fn initial_agent_energy(&self) -> u32 {
        self.initial_agent_energy
    }

    /// Agents in the order they joined.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Looks an agent up.
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub(crate) fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    /// Current counters.
    pub fn counters(&self) -> WorldCounters {
        self.counters
    }

    /// Individuals in the world at build time.
    pub fn num_survivors(&self) -> u32 {
        self.counters.survivors
    }

    /// Individuals rescued so far, alive or not.
    pub fn total_saved(&self) -> u32 {
        self.counters.saved_alive + self.counters.saved_dead
    }

    /// The object on top of the cell's stack.
    pub fn top_layer(&self, location: Location) -> Option<&WorldObject> {
        self.cell(location)
            .and_then(Cell::top_layer)
            .and_then(|key| self.objects.get(&key))
    }

    fn pick_spawn(&mut self, gid: u32) -> Location {
        if let Some(slot) = self.spawns.iter_mut().find(|s| s.gid == Some(gid)) {
            let location = slot.location;
            slot.remaining -= 1;
            if slot.remaining == 0 {
                self.spawns.retain(|s| s.remaining > 0);
            }
            return location;
        }

        let open: Vec<Location> = self
            .spawns
            .iter()
            .filter(|s| s.gid.is_none())
            .map(|s| s.location)
            .collect();
        if let Some(location) = open.choose(&mut self.rng) {
            return *location;
        }
        if let Some(location) = self.stable_cells.choose(&mut self.rng) {
            return *location;
        }
        Location::new(0, 0)
    }

    /// Places a new agent with the starting energy and returns where it landed.
    #[instrument(skip_all, fields(agent = %id))]
    pub fn add_agent(&mut self, id: AgentId) -> Location {
        let location = self.pick_spawn(id.gid);
        if let Some(cell) = self.cell(location) {
            if cell.is_on_fire() {
                warn!(%location, "agent placed on a fire grid");
            } else if cell.is_killer() {
                warn!(%location, "agent placed on a killer grid");
            }
        }
        self.insert_agent(Agent::new(id, location, self.initial_agent_energy));
        location
    }

    fn insert_agent(&mut self, agent: Agent) {
        if self.agent(agent.id).is_some() {
            return;
        }
        if let Some(cell) = self.cell_mut(agent.location) {
            cell.agents.push(agent.id);
        }
        debug!(agent = %agent.id, location = %agent.location, energy = agent.energy, "agent added");
        self.agents.push(agent);
        self.counters.alive_agents += 1;
    }

    /// Removes an agent from its cell and from the world. Unknown agents are ignored.
    pub fn remove_agent(&mut self, id: AgentId) {
        let Some(position) = self.agents.iter().position(|a| a.id == id) else {
            return;
        };
        let agent = self.agents.remove(position);
        if let Some(cell) = self.cell_mut(agent.location) {
            cell.agents.retain(|a| *a != id);
        }
        self.counters.alive_agents = self.counters.alive_agents.saturating_sub(1);
    }

    /// Relocates an agent. Returns false when the agent or the destination does not exist.
    pub fn move_agent(&mut self, id: AgentId, destination: Location) -> bool {
        if !self.on_map(destination) {
            return false;
        }
        let Some(from) = self.agent(id).map(|a| a.location) else {
            return false;
        };
        if let Some(cell) = self.cell_mut(from) {
            cell.agents.retain(|a| *a != id);
        }
        if let Some(cell) = self.cell_mut(destination) {
            cell.agents.push(id);
        }
        if let Some(agent) = self.agent_mut(id) {
            agent.location = destination;
        }
        true
    }

    /// Pops the top layer of a cell and returns it.
    ///
    /// The location goes to the removal log. Survivors count as saved, alive or dead by
    /// their energy.
    pub fn remove_top_layer(&mut self, location: Location) -> Option<WorldObject> {
        let key = self.cell_mut(location)?.layers.pop()?;
        let object = self.objects.remove(&key)?;
        self.top_layer_removed.push(location);
        if let Some(Rescued { count, alive }) = object.rescued() {
            if alive {
                self.counters.saved_alive += count;
            } else {
                self.counters.saved_dead += count;
            }
        }
        Some(object)
    }

    /// What an agent sees of one cell. Off the map gives `NO_GRID`.
    pub fn grid_info(&self, location: Location) -> GridInfo {
        let Some(cell) = self.cell(location) else {
            return GridInfo::NoGrid;
        };
        GridInfo::Grid(CellInfo {
            kind: cell.kind,
            location,
            on_fire: cell.is_on_fire(),
            move_cost: cell.move_cost,
            agents: cell.agents.clone(),
            top_layer: self
                .top_layer(location)
                .map_or(ObjectInfo::NoLayers, WorldObject::info),
        })
    }

    /// One reading per layer, top first.
    ///
    /// The top layer reads true. Each deeper layer loses a random amount drawn from a range
    /// that widens with depth.
    pub fn generated_life_signals(&mut self, location: Location) -> LifeSignals {
        let Some(cell) = self.cell(location) else {
            return LifeSignals::default();
        };
        let signals: Vec<u32> = cell
            .layers
            .iter()
            .rev()
            .filter_map(|key| self.objects.get(key))
            .map(WorldObject::life_signal)
            .collect();

        let (mut low, mut high) = (DEPTH_LOW_START, DEPTH_HIGH_START);
        let mut generated = Vec::with_capacity(signals.len());
        for (depth, signal) in signals.into_iter().enumerate() {
            if depth == 0 {
                generated.push(signal);
                continue;
            }
            let distortion = self.rng.random_range(low..=high);
            generated.push(signal.saturating_sub(distortion));
            low += DEPTH_LOW_INC;
            high += DEPTH_HIGH_INC;
        }
        LifeSignals(generated)
    }

    /// The cell at `location` with its generated life signals and its eight neighbours.
    pub fn surround_info(&mut self, location: Location) -> Option<SurroundInfo> {
        let current = self.grid_info(location);
        if current == GridInfo::NoGrid {
            return None;
        }
        let life_signals = self.generated_life_signals(location);
        let neighbours = Direction::COMPASS.map(|d| self.grid_info(location.add(d)));
        Some(SurroundInfo {
            current,
            life_signals,
            neighbours,
        })
    }

    /// Agents that die at the end of this round: no energy left, or on a fire or killer cell.
    ///
    /// The dead-agent counter goes up, the agents stay in the world until removed.
    pub fn grim_reaper(&mut self) -> Vec<AgentId> {
        let mut dead = Vec::new();
        for agent in &self.agents {
            let cause = if agent.energy == 0 {
                "ran out of energy"
            } else {
                match self.cell(agent.location) {
                    Some(cell) if cell.is_on_fire() => "ran into the fire",
                    Some(cell) if cell.is_killer() => "ran into a killer grid",
                    _ => continue,
                }
            };
            info!(agent = %agent.id, cause, "agent died");
            dead.push(agent.id);
        }
        self.counters.dead_agents += dead.len() as u32;
        dead
    }

    /// JSON view for replay sinks.
    pub fn snapshot(&self) -> WorldSnapshot {
        let mut grid_data = Vec::with_capacity(self.cells.len());
        let mut agent_data = Vec::with_capacity(self.agents.len());
        for cell in &self.cells {
            grid_data.push(GridCellData {
                grid_type: cell.kind.name().to_owned(),
                stack: StackData {
                    grid_loc: cell.location.into(),
                    move_cost: cell.move_cost,
                    contents: cell
                        .layers
                        .iter()
                        .filter_map(|key| self.objects.get(key))
                        .map(WorldObject::content)
                        .collect(),
                },
            });
            agent_data.extend(cell.agents.iter().filter_map(|id| self.agent(*id)).map(
                |agent| AgentData {
                    id: agent.id.id,
                    gid: agent.id.gid,
                    x: agent.location.x,
                    y: agent.location.y,
                    energy_level: agent.energy,
                    command_sent: agent.command_sent.clone(),
                },
            ));
        }

        let c = self.counters;
        WorldSnapshot {
            grid_data,
            agent_data,
            top_layer_rem_data: self.top_layer_removed.iter().map(|l| (*l).into()).collect(),
            number_of_alive_agents: c.alive_agents,
            number_of_dead_agents: c.dead_agents,
            number_of_survivors: c.survivors,
            number_of_survivors_alive: c.survivors_alive,
            number_of_survivors_dead: c.survivors_dead,
            number_of_survivors_saved_alive: c.saved_alive,
            number_of_survivors_saved_dead: c.saved_dead,
        }
    }

    fn survivors_in(&self, cell: &Cell) -> u32 {
        cell.layers
            .iter()
            .filter_map(|key| self.objects.get(key))
            .filter_map(WorldObject::rescued)
            .map(|r| r.count)
            .sum()
    }

    /// Contents of the world file handed to agents: a size header, then one line per cell
    /// with its flags and a noisy estimate of how likely it is to hold survivors.
    pub fn agent_world_info(&mut self) -> String {
        let mut out = format!("Size: ( WIDTH {} , HEIGHT {} )\n", self.width, self.height);
        for i in 0..self.cells.len() {
            let count = self.survivors_in(&self.cells[i]);
            let levels = self.levels;
            let rng = &mut self.rng;
            let coin: bool = rng.random();
            let percent = if count == 0 {
                0
            } else {
                let percent = match (count <= levels.low, count <= levels.mid, coin) {
                    (true, _, true) => rng.random_range(0..=5),
                    (true, _, false) => 5 + rng.random_range(0..=5),
                    (false, true, true) => 15 + rng.random_range(0..=10),
                    (false, true, false) => 25 + rng.random_range(0..=15),
                    (false, false, true) => 15 + rng.random_range(0..=35),
                    (false, false, false) => 50 + rng.random_range(0..=40),
                };
                percent.max(1)
            };

            let cell = &self.cells[i];
            let flag = |on: bool, c: char| if on { format!("+{c}") } else { format!("-{c}") };
            let _ = write!(
                out,
                "[({},{}),({},{},{}),{percent:3}%",
                cell.location.x,
                cell.location.y,
                flag(cell.is_on_fire(), 'F'),
                flag(cell.is_killer(), 'K'),
                flag(cell.kind == GridKind::Charging, 'C'),
            );
            if self.move_cost_enabled {
                let _ = write!(out, ",{}", cell.move_cost);
            }
            out.push_str("]\n");
        }
        out
    }
}
