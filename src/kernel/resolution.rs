//! Resolution of one round's actions against the world.
//!
//! Phases always run in the same order: TEAM_DIG, SAVE_SURV, MOVE, SLEEP, OBSERVE. Results are
//! built afterwards, in the same order, from the final state of the world.

use std::collections::BTreeMap;

use rand::seq::IndexedRandom;
use tracing::{debug, trace};

use crate::common::{AgentId, Direction, GridKind, Location, NORMAL_CHARGE};
use crate::configuration::{Configuration, SaveStrategy, TieStrategy};
use crate::protocol::info::SurroundInfo;
use crate::protocol::{AegisCommand, AgentCommand};
use crate::registry::AgentHandler;
use crate::world::layer::WorldObject;
use crate::world::AegisWorld;

/// Actionable commands of one round, bucketed by kind.
#[derive(Debug, Default)]
pub(crate) struct CommandBatch {
    team_dig: Vec<AgentId>,
    save_surv: Vec<AgentId>,
    moves: Vec<(AgentId, Direction)>,
    sleep: Vec<AgentId>,
    observe: Vec<(AgentId, Location)>,
}

impl CommandBatch {
    /// Files `command` under its kind. Returns false for commands that are not resolved here.
    pub(crate) fn push(&mut self, agent: AgentId, command: AgentCommand) -> bool {
        match command {
            AgentCommand::TeamDig => self.team_dig.push(agent),
            AgentCommand::SaveSurv => self.save_surv.push(agent),
            AgentCommand::Move(direction) => self.moves.push((agent, direction)),
            AgentCommand::Sleep => self.sleep.push(agent),
            AgentCommand::Observe(location) => self.observe.push((agent, location)),
            _ => return false,
        }
        true
    }
}

/// Who gets which result.
#[derive(Debug, Default)]
struct Acted {
    team_dig: Vec<AgentId>,
    save_surv: Vec<AgentId>,
    moves: Vec<AgentId>,
    sleep: Vec<AgentId>,
    observe: Vec<(AgentId, Location)>,
}

/// Resolves every action of the round and returns the result each acting agent gets next
/// round, in resolution order.
pub(crate) fn resolve(
    batch: CommandBatch,
    world: &mut AegisWorld,
    handler: &mut AgentHandler,
    config: &Configuration,
) -> Vec<(AgentId, AegisCommand)> {
    let mut acted = Acted::default();
    team_dig(batch.team_dig, world, config, &mut acted);
    save_surv(batch.save_surv, world, handler, config, &mut acted);
    moves(batch.moves, world, config, &mut acted);
    sleep(batch.sleep, world, config, &mut acted);
    observe(batch.observe, world, config, &mut acted);
    results(acted, world, config)
}

/// Takes the first pending agent and every other pending agent on its cell.
fn next_team(world: &AegisWorld, pending: &mut Vec<AgentId>) -> Option<(Location, Vec<AgentId>)> {
    while !pending.is_empty() {
        let first = pending.remove(0);
        let Some(location) = world.agent(first).map(|a| a.location()) else {
            continue;
        };
        let mut team = vec![first];
        pending.retain(|agent| {
            if world.agent(*agent).map(|a| a.location()) == Some(location) {
                team.push(*agent);
                false
            } else {
                true
            }
        });
        return Some((location, team));
    }
    None
}

fn charge(world: &mut AegisWorld, team: &[AgentId], cost: u32) {
    for agent in team {
        if let Some(agent) = world.agent_mut(*agent) {
            agent.remove_energy(cost);
        }
    }
}

fn team_dig(
    mut pending: Vec<AgentId>,
    world: &mut AegisWorld,
    config: &Configuration,
    acted: &mut Acted,
) {
    while let Some((location, team)) = next_team(world, &mut pending) {
        let cost = match world.top_layer(location) {
            Some(WorldObject::Rubble(rubble)) if rubble.remove_agents as usize <= team.len() => {
                let cost = rubble.remove_energy;
                world.remove_top_layer(location);
                debug!(%location, diggers = team.len(), "rubble removed");
                cost
            }
            _ => config.team_dig_cost,
        };
        charge(world, &team, cost);
        acted.team_dig.extend(team);
    }
}

fn save_surv(
    mut pending: Vec<AgentId>,
    world: &mut AegisWorld,
    handler: &mut AgentHandler,
    config: &Configuration,
    acted: &mut Acted,
) {
    while let Some((location, team)) = next_team(world, &mut pending) {
        let has_survivors = world
            .top_layer(location)
            .is_some_and(|top| top.rescued().is_some());
        if has_survivors {
            if let Some(rescued) = world.remove_top_layer(location).and_then(|o| o.rescued()) {
                debug!(
                    %location,
                    count = rescued.count,
                    alive = rescued.alive,
                    "survivors rescued"
                );
                for gid in credited_groups(&team, config, world) {
                    handler.credit_saved(gid, rescued.count, rescued.alive);
                }
            }
        }
        charge(world, &team, config.save_surv_cost);
        acted.save_surv.extend(team);
    }
}

/// Groups scoring a rescue by `team`, per the configured strategy.
fn credited_groups(team: &[AgentId], config: &Configuration, world: &mut AegisWorld) -> Vec<u32> {
    let mut participants: BTreeMap<u32, usize> = BTreeMap::new();
    for agent in team {
        *participants.entry(agent.gid).or_insert(0) += 1;
    }

    match config.save_strategy {
        SaveStrategy::All => participants.into_keys().collect(),
        SaveStrategy::Random => team.choose(&mut world.rng).map(|a| a.gid).into_iter().collect(),
        SaveStrategy::Count => {
            let Some(largest) = participants.values().copied().max() else {
                return vec![];
            };
            let tied: Vec<u32> = participants
                .into_iter()
                .filter(|(_, count)| *count == largest)
                .map(|(gid, _)| gid)
                .collect();
            match config.tie_strategy {
                _ if tied.len() == 1 => tied,
                TieStrategy::All => tied,
                TieStrategy::Random => tied.choose(&mut world.rng).copied().into_iter().collect(),
            }
        }
    }
}

fn moves(
    pending: Vec<(AgentId, Direction)>,
    world: &mut AegisWorld,
    config: &Configuration,
    acted: &mut Acted,
) {
    for (id, direction) in pending {
        let Some(from) = world.agent(id).map(|a| a.location()) else {
            continue;
        };
        let destination = from.add(direction);
        let cost = world.cell(destination).map(|c| c.move_cost());
        match cost {
            Some(cost) if direction != Direction::Center => {
                world.move_agent(id, destination);
                if let Some(agent) = world.agent_mut(id) {
                    agent.remove_energy(cost);
                    agent.orientation = direction;
                    agent.steps += 1;
                }
                trace!(agent = %id, %destination, cost, "moved");
            }
            _ => charge(world, &[id], config.move_cost),
        }
        acted.moves.push(id);
    }
}

fn can_recharge(world: &AegisWorld, config: &Configuration, id: AgentId) -> bool {
    config.sleep_everywhere
        || world
            .agent(id)
            .and_then(|a| world.cell(a.location()))
            .is_some_and(|c| c.kind() == GridKind::Charging)
}

fn sleep(pending: Vec<AgentId>, world: &mut AegisWorld, config: &Configuration, acted: &mut Acted) {
    for id in pending {
        if world.agent(id).is_none() {
            continue;
        }
        if can_recharge(world, config, id) {
            if let Some(agent) = world.agent_mut(id) {
                agent.add_energy(NORMAL_CHARGE);
            }
        }
        acted.sleep.push(id);
    }
}

fn observe(
    pending: Vec<(AgentId, Location)>,
    world: &mut AegisWorld,
    config: &Configuration,
    acted: &mut Acted,
) {
    for (id, location) in pending {
        if world.agent(id).is_none() {
            continue;
        }
        charge(world, &[id], config.observe_cost);
        acted.observe.push((id, location));
    }
}

fn results(
    acted: Acted,
    world: &mut AegisWorld,
    config: &Configuration,
) -> Vec<(AgentId, AegisCommand)> {
    let mut out = Vec::new();

    let surround_results: [(Vec<AgentId>, fn(u32, SurroundInfo) -> AegisCommand); 3] = [
        (acted.team_dig, |energy, surround| AegisCommand::TeamDigResult { energy, surround }),
        (acted.save_surv, |energy, surround| AegisCommand::SaveSurvResult { energy, surround }),
        (acted.moves, |energy, surround| AegisCommand::MoveResult { energy, surround }),
    ];
    for (agents, build) in surround_results {
        for id in agents {
            let Some((energy, location)) = world.agent(id).map(|a| (a.energy(), a.location()))
            else {
                continue;
            };
            if let Some(surround) = world.surround_info(location) {
                out.push((id, build(energy, surround)));
            }
        }
    }

    for id in acted.sleep {
        let success = can_recharge(world, config, id);
        if let Some(agent) = world.agent(id) {
            out.push((
                id,
                AegisCommand::SleepResult {
                    success,
                    energy: agent.energy(),
                },
            ));
        }
    }

    for (id, location) in acted.observe {
        let Some(energy) = world.agent(id).map(|a| a.energy()) else {
            continue;
        };
        let grid = world.grid_info(location);
        let life_signals = world.generated_life_signals(location);
        out.push((
            id,
            AegisCommand::ObserveResult {
                energy,
                grid,
                life_signals,
            },
        ));
    }
    out
}
