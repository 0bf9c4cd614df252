//! # AEGIS Kernel
//!
//! The simulation kernel of AEGIS, a turn-based multi-agent search-and-rescue competition.
//!
//! It provides:
//! - A grid world of stacked rubble and survivors, with charging, fire and killer cells (`AegisWorld`)
//! - A lockstep round engine that prompts every connected agent, resolves their actions and runs
//!   the environment simulators (`Kernel`)
//! - The agent wire protocol: length-prefixed text frames over TCP and their command grammar
//! - A replay log and per-round world snapshots for later visualization
//!
//! Agents are separate processes that connect to the kernel over TCP. A faulty agent is removed
//! from the simulation, the run goes on without it.
//!
//! # Documentation Overview
//!
//! - For the round engine and the kernel lifecycle, see the [`kernel`] module.
//! - For the options, see [`Configuration`](crate::configuration::Configuration).
//! - For the world file layout, see [`WorldDescription`](crate::world::description::WorldDescription).
//! - For what agents send and receive, see the [`protocol`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! use aegis_kernel::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let json = std::fs::read_to_string("world.json")?;
//!     let description = WorldDescription::from_json_str(&json)?;
//!
//!     let config = Configuration::from_env().with_rounds(100).with_expected_agents(2);
//!     let world = AegisWorld::build(&description, config.move_cost_enabled())?;
//!     let replay = ReplayFile::create("run.replay", &json)?;
//!
//!     let mut kernel = Kernel::new(config, world, replay);
//!     let summary = kernel.run()?;
//!     for group in &summary.groups {
//!         println!("{}: {} saved", group.name, group.number_saved);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Agent Requirements
//!
//! - Connect to the kernel port and send `CONNECT ( group_name )` first
//! - Every message is a 4-byte little-endian length followed by the text and a NUL byte
//! - Send at most one action between `ROUND_START` and the command deadline, then `END_TURN`
#![warn(missing_docs)]

pub use anyhow;
pub mod common;
pub mod configuration;
pub mod error;
pub mod kernel;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod replay;
pub mod simulators;
pub mod transport;
pub mod world;

/// Commonly used types for quick access.
///
/// ```rust
/// use aegis_kernel::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration) and its strategies
/// - [`Kernel`](crate::kernel::Kernel) and its run summary
/// - [`AegisWorld`](crate::world::AegisWorld) and [`WorldDescription`](crate::world::description::WorldDescription)
/// - the replay sinks
pub mod prelude {
    pub use crate::common::{AgentId, Direction, GridKind, Location};
    pub use crate::configuration::{Configuration, SaveStrategy, TieStrategy};
    pub use crate::kernel::{EndReason, Kernel, KernelState, SimulationSummary};
    pub use crate::replay::{MemoryReplay, ReplayFile, ReplaySink};
    pub use crate::world::description::WorldDescription;
    pub use crate::world::AegisWorld;
}
