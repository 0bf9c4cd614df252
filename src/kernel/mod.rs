//! The round engine.
//!
//! A [`Kernel`] owns the world, the agent registry and a replay sink, and runs the
//! `IDLE → CONNECT_AGENTS → RUN_SIMULATION → SHUT_DOWN` state machine on the calling thread.
//!
//! Each round every agent, in turn order, gets its forwarded messages, the result of its
//! previous action and `ROUND_START`, then has a bounded time to send one action. Once all
//! agents had their turn the actions are resolved, the simulators run, dead and crashed agents
//! are removed and the mailboxes swap.

mod resolution;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, info, instrument, trace, warn};

use crate::common::AgentId;
use crate::configuration::Configuration;
use crate::error::AgentCrashed;
use crate::logger::init_logger;
use crate::protocol::{AegisCommand, AgentCommand, IssuedCommand};
use crate::registry::{AgentGroup, AgentHandler};
use crate::replay::ReplaySink;
use crate::simulators::run_simulators;
use crate::world::{AegisWorld, WorldCounters};
use resolution::{resolve, CommandBatch};

/// Attempts per expected agent during CONNECT_AGENTS.
const CONNECT_ATTEMPTS: usize = 5;

/// Kernel lifecycle.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    /// Waiting for the first agent.
    Idle,
    ConnectAgents,
    RunSimulation,
    ShutDown,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Every round was played.
    RoundLimit,
    /// No agent left.
    AllAgentsDead,
    /// Every survivor was rescued, alive or dead.
    AllSurvivorsSaved,
    /// Nobody was connected when the simulation started.
    NoAgentsConnected,
    /// Nobody connected within the idle budget.
    IdleTimeout,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSummary {
    /// Rounds fully played.
    pub rounds_played: u32,
    #[allow(missing_docs)]
    pub end_reason: EndReason,
    /// Groups and their rescue tallies.
    pub groups: Vec<AgentGroup>,
    /// World counters at the end.
    pub counters: WorldCounters,
}

/// The simulation kernel.
pub struct Kernel<S: ReplaySink> {
    config: Configuration,
    world: AegisWorld,
    handler: AgentHandler,
    replay: S,
    state: KernelState,
    round: u32,
    end_reason: Option<EndReason>,
    batch: CommandBatch,
    records: Vec<String>,
    crashed: Vec<AgentId>,
}

impl<S: ReplaySink> Kernel<S> {
    /// Creates a kernel around a built world. Installs the file logger if the configuration
    /// asks for it.
    #[instrument(skip_all)]
    pub fn new(config: Configuration, world: AegisWorld, replay: S) -> Kernel<S> {
        if config.log {
            if let Err(e) = init_logger(None) {
                warn!("{e:#}, keeping the current subscriber");
            }
        }
        trace!(?config);

        Kernel {
            handler: AgentHandler::new(&config),
            config,
            world,
            replay,
            state: KernelState::Idle,
            round: 0,
            end_reason: None,
            batch: CommandBatch::default(),
            records: vec![],
            crashed: vec![],
        }
    }

    /// Binds the agent port. [`run`](Self::run) does it on its own if needed; call it first
    /// to learn the address when the configured port is 0.
    pub fn listen(&mut self) -> anyhow::Result<SocketAddr> {
        match self.handler.local_addr() {
            Some(addr) => Ok(addr),
            None => self.handler.listen(),
        }
    }

    /// Current state.
    pub fn state(&self) -> KernelState {
        self.state
    }

    /// The world.
    pub fn world(&self) -> &AegisWorld {
        &self.world
    }

    /// The agent registry.
    pub fn handler(&self) -> &AgentHandler {
        &self.handler
    }

    /// The replay sink.
    pub fn replay(&self) -> &S {
        &self.replay
    }

    /// Gives the replay sink back.
    pub fn into_replay(self) -> S {
        self.replay
    }

    /// Runs the state machine until shutdown.
    ///
    /// # Errors
    /// Only startup failures, such as the port being unavailable. Agent faults never end a run.
    pub fn run(&mut self) -> anyhow::Result<SimulationSummary> {
        self.listen()?;
        loop {
            match self.state {
                KernelState::Idle => self.idle()?,
                KernelState::ConnectAgents => self.connect_agents()?,
                KernelState::RunSimulation => self.run_simulation(),
                KernelState::ShutDown => break,
            }
        }
        let summary = self.summary();
        self.shutdown();
        Ok(summary)
    }

    fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            rounds_played: self.round,
            end_reason: self.end_reason.unwrap_or(EndReason::RoundLimit),
            groups: self.handler.groups().to_vec(),
            counters: self.world.counters(),
        }
    }

    fn end_simulation(&mut self, reason: EndReason) {
        info!(?reason, round = self.round, "simulation over");
        self.end_reason = Some(reason);
        self.replay.simulation_complete();
        self.state = KernelState::ShutDown;
    }

    /// Waits for the first agent within the idle budget.
    #[instrument(skip_all)]
    fn idle(&mut self) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.config.idle_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("idle for too long, shutting down");
                self.end_simulation(EndReason::IdleTimeout);
                return Ok(());
            }
            if self.connect_agent(remaining)? {
                self.state = KernelState::ConnectAgents;
                return Ok(());
            }
        }
    }

    #[instrument(skip_all, fields(expected = self.config.expected_agents))]
    fn connect_agents(&mut self) -> anyhow::Result<()> {
        let mut count = self.handler.agent_count();
        for _ in count..self.config.expected_agents {
            for _ in 0..CONNECT_ATTEMPTS {
                if self.connect_agent(self.config.connect_timeout)? {
                    count += 1;
                    break;
                }
            }
        }
        info!(
            "{count} out of {} agents connected",
            self.config.expected_agents
        );
        self.state = KernelState::RunSimulation;
        Ok(())
    }

    /// Registers one agent, spawns it and answers with CONNECT_OK.
    fn connect_agent(&mut self, timeout: Duration) -> anyhow::Result<bool> {
        let Some(id) = self.handler.connect_agent(timeout)? else {
            return Ok(false);
        };
        let location = self.world.add_agent(id);
        let energy = self
            .world
            .agent(id)
            .map_or(self.world.initial_agent_energy(), |a| a.energy());
        let connect_ok = AegisCommand::ConnectOk {
            id,
            energy,
            location,
            file: self.config.world_file_name.clone(),
        };
        if let Err(crash) = self.handler.send_to(id, &connect_ok) {
            warn!(%crash, "agent lost during handshake");
            self.world.remove_agent(id);
            self.handler.remove_agent(id);
            return Ok(false);
        }
        self.replay.write_line(&format!(
            "ADD_AGT; Info(ID {}, GID {}, Eng {energy}):Loc(X {}, Y {});\n",
            id.id, id.gid, location.x, location.y
        ));
        Ok(true)
    }

    #[instrument(skip_all, fields(rounds = self.config.rounds))]
    fn run_simulation(&mut self) {
        if self.handler.agent_count() == 0 {
            warn!("no agents connected");
            self.replay
                .write_line("MSG;No Agents Connected to the Kernel;\n");
            self.end_simulation(EndReason::NoAgentsConnected);
            return;
        }

        info!("running simulation");
        self.replay.write_line(&format!(
            "Simulation Start: Number of Rounds {};\n",
            self.config.rounds
        ));
        self.replay.snapshot(0, &self.world.snapshot());

        for round in 1..=self.config.rounds {
            if self.handler.agent_count() == 0 {
                self.replay.write_line("MSG;All Agents are Dead !!;\n");
                self.end_simulation(EndReason::AllAgentsDead);
                return;
            }
            if self.world.total_saved() == self.world.num_survivors() {
                self.replay.write_line("MSG;All Survivors Saved !!;\n");
                self.end_simulation(EndReason::AllSurvivorsSaved);
                return;
            }
            self.run_round(round);
        }

        self.replay.write_line("Simulation_Over;\n");
        self.end_simulation(EndReason::RoundLimit);
    }

    #[instrument(skip(self))]
    fn run_round(&mut self, round: u32) {
        // 1. prompt every agent and collect one action each
        self.replay.write_line(&format!("RS;{round};\n"));
        let issued = self.collect_commands();
        for command in issued {
            self.accept_command(command);
        }
        let records = if self.records.is_empty() {
            "None".to_owned()
        } else {
            self.records
                .drain(..)
                .map(|r| format!("[{r}]"))
                .collect::<Vec<_>>()
                .join("$")
        };
        self.replay.write_line(&format!("Agent_Cmds;{{{records}}}\n"));

        // 2. resolve and buffer the results for next round
        let batch = std::mem::take(&mut self.batch);
        let results = resolve(batch, &mut self.world, &mut self.handler, &self.config);
        for (agent, result) in results {
            self.handler.set_result(agent, result);
        }

        // 3. environment
        let events = run_simulators(&mut self.world, self.config.fire_spread);
        self.replay.write_line(&events);

        // 4. deaths, then next round's mailboxes
        self.grim_reaper();
        self.handler.swap_mailboxes();
        self.replay.write_line("RE;\n");
        self.round = round;
        self.replay.snapshot(round, &self.world.snapshot());
    }

    /// Gives every agent its turn and returns the actions they chose.
    fn collect_commands(&mut self) -> Vec<IssuedCommand> {
        let mut issued = vec![];
        self.handler.reset_current_agent();
        while let Some(agent) = self.handler.current_agent() {
            match self.agent_turn(agent) {
                Ok(Some(command)) => issued.push(command),
                Ok(None) => debug!(%agent, "no action this round"),
                Err(crash) => {
                    warn!(%crash, "agent crashed during its turn");
                    if !self.crashed.contains(&agent) {
                        self.crashed.push(agent);
                    }
                }
            }
            self.handler.move_to_next_agent();
        }
        issued
    }

    fn agent_turn(&mut self, agent: AgentId) -> Result<Option<IssuedCommand>, AgentCrashed> {
        self.handler.flush_messages(agent)?;
        self.handler.flush_result(agent)?;
        self.handler.send_to(agent, &AegisCommand::RoundStart)?;
        let command = self.poll_command()?;
        self.handler.send_to(agent, &AegisCommand::RoundEnd)?;
        Ok(command)
    }

    /// Reads the current agent's commands until END_TURN, an unknown command or the timeout.
    ///
    /// The last actionable command wins. With send-and-act, SEND_MESSAGE is handled right away
    /// and does not use up the action.
    fn poll_command(&mut self) -> Result<Option<IssuedCommand>, AgentCrashed> {
        let deadline = Instant::now() + self.config.command_timeout;
        let mut last = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(issued) = self.handler.read_command_of_current(remaining)? else {
                continue;
            };
            let command = &issued.command;
            if matches!(command, AgentCommand::EndTurn | AgentCommand::Unknown) {
                break;
            } else if self.config.send_and_act
                && matches!(command, AgentCommand::SendMessage { .. })
            {
                self.accept_command(issued);
            } else if command.is_actionable() {
                last = Some(issued);
            } else {
                debug!(agent = %issued.agent, %command, "ignored");
            }
        }
        Ok(last)
    }

    /// Records an accepted command and files it for resolution. Messages are forwarded now.
    fn accept_command(&mut self, issued: IssuedCommand) {
        self.records.push(issued.proc_string());
        if let Some(agent) = self.world.agent_mut(issued.agent) {
            agent.command_sent = Some(issued.command.to_string());
        }
        match issued.command {
            AgentCommand::SendMessage {
                recipients,
                message,
            } => self
                .handler
                .forward_message(issued.agent, recipients, message),
            command => {
                self.batch.push(issued.agent, command);
            }
        }
    }

    /// Removes every agent that died this round or crashed. Agents that died in the world get
    /// a DEATH_CARD, crashed ones are past reach.
    fn grim_reaper(&mut self) {
        let crashed = std::mem::take(&mut self.crashed);
        let mut dead = self.world.grim_reaper();
        for &agent in &crashed {
            if !dead.contains(&agent) {
                dead.push(agent);
            }
        }

        let mut line = String::from("Dead_Agents; { ");
        if dead.is_empty() {
            line.push_str("NONE");
        }
        for agent in dead {
            line.push_str(&format!("{},", agent.proc_string()));
            self.world.remove_agent(agent);
            if !crashed.contains(&agent) {
                if let Err(crash) = self.handler.send_to(agent, &AegisCommand::DeathCard) {
                    debug!(%crash, "DEATH_CARD not delivered");
                }
            }
            self.handler.remove_agent(agent);
        }
        line.push_str(" };\n");
        self.replay.write_line(&line);
    }

    #[instrument(skip_all)]
    fn shutdown(&mut self) {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.replay
            .write_line(&format!("MSG;System Run ended on: {now}\n"));
        self.replay.write_line("MSG;Kernel Shutting Down;\n");
        self.handler.shutdown();
        info!("kernel shut down");
    }
}
