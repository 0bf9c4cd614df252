//! Scripted agent and kernel harness shared by the integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use aegis_kernel::prelude::*;
use aegis_kernel::protocol::{parse_aegis_command, AegisCommand, AgentCommand, ForwardedMessage};
use aegis_kernel::transport::AgentConnection;
use aegis_kernel::world::description::StackContent;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options fast enough for tests, on an ephemeral port.
pub fn test_config(agents: usize, rounds: u32) -> Configuration {
    Configuration::new()
        .with_port(0)
        .with_expected_agents(agents)
        .with_rounds(rounds)
        .with_command_timeout(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(2))
        .with_send_timeout(Duration::from_secs(1))
        .with_idle_timeout(Duration::from_secs(10))
}

pub fn survivor(energy: u32) -> StackContent {
    StackContent::new(
        "sv",
        &[
            ("energy_level", energy),
            ("damage_factor", 0),
            ("body_mass", 0),
            ("mental_state", 0),
        ],
    )
}

pub fn rubble(remove_energy: u32, remove_agents: u32) -> StackContent {
    StackContent::new(
        "rb",
        &[("remove_energy", remove_energy), ("remove_agents", remove_agents)],
    )
}

pub type KernelThread = JoinHandle<(Kernel<MemoryReplay>, anyhow::Result<SimulationSummary>)>;

/// Binds the kernel and runs it on its own thread.
pub fn start_kernel(
    config: Configuration,
    description: &WorldDescription,
) -> (SocketAddr, KernelThread) {
    let world = AegisWorld::build(description, config.move_cost_enabled()).unwrap();
    let mut kernel = Kernel::new(config, world, MemoryReplay::new());
    let addr = kernel.listen().unwrap();
    let handle = thread::spawn(move || {
        let summary = kernel.run();
        (kernel, summary)
    });
    (addr, handle)
}

/// What an agent received before ROUND_START.
#[derive(Debug, Default)]
pub struct Turn {
    pub messages: Vec<ForwardedMessage>,
    pub result: Option<AegisCommand>,
}

/// A test agent driven step by step from the test thread.
pub struct TestAgent {
    connection: AgentConnection,
    pub id: AgentId,
    pub location: Location,
    pub energy: u32,
}

impl TestAgent {
    /// Connects, sends CONNECT and waits for CONNECT_OK.
    pub fn connect(addr: SocketAddr, group: &str) -> TestAgent {
        let mut connection = AgentConnection::connect(addr, Duration::from_secs(1)).unwrap();
        connection.send(&format!("CONNECT ( {group} )")).unwrap();
        let payload = connection.receive(RECEIVE_TIMEOUT).unwrap().unwrap();
        match parse_aegis_command(&payload) {
            AegisCommand::ConnectOk {
                id,
                energy,
                location,
                ..
            } => TestAgent {
                connection,
                id,
                location,
                energy,
            },
            other => panic!("expected CONNECT_OK, got {other}"),
        }
    }

    pub fn receive(&mut self) -> AegisCommand {
        let payload = self
            .connection
            .receive(RECEIVE_TIMEOUT)
            .unwrap()
            .expect("kernel went silent");
        parse_aegis_command(&payload)
    }

    pub fn send(&mut self, command: &AgentCommand) {
        self.connection.send(&command.to_string()).unwrap();
    }

    /// Sends a payload as is, for input the kernel cannot parse.
    pub fn send_raw(&mut self, payload: &str) {
        self.connection.send(payload).unwrap();
    }

    /// Reads the message and result envelopes up to ROUND_START.
    pub fn start_turn(&mut self) -> Turn {
        let mut turn = Turn::default();
        let AegisCommand::MessagesStart(count) = self.receive() else {
            panic!("expected MESSAGES_START");
        };
        for _ in 0..count {
            match self.receive() {
                AegisCommand::FwdMessage(message) => turn.messages.push(message),
                other => panic!("expected FWD_MESSAGE, got {other}"),
            }
        }
        assert_eq!(self.receive(), AegisCommand::MessagesEnd);

        let AegisCommand::CmdResultStart(count) = self.receive() else {
            panic!("expected CMD_RESULT_START");
        };
        if count == 1 {
            turn.result = Some(self.receive());
        }
        assert_eq!(self.receive(), AegisCommand::CmdResultEnd);
        assert_eq!(self.receive(), AegisCommand::RoundStart);
        turn
    }

    /// Sends the round's action, ends the turn and waits for ROUND_END.
    pub fn act(&mut self, command: Option<AgentCommand>) {
        if let Some(command) = command {
            self.send(&command);
        }
        self.send(&AgentCommand::EndTurn);
        assert_eq!(self.receive(), AegisCommand::RoundEnd);
    }

    /// One full turn.
    pub fn play(&mut self, command: Option<AgentCommand>) -> Turn {
        let turn = self.start_turn();
        self.act(command);
        turn
    }

    /// Drops the socket without saying goodbye.
    pub fn crash(mut self) {
        self.connection.disconnect();
    }
}
