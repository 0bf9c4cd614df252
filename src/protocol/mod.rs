//! The text protocol spoken between the kernel and its agents.
//!
//! Two closed command families travel on the wire: [`AgentCommand`] from agents to the kernel
//! and [`AegisCommand`] from the kernel to agents. Each has a `Display` implementation giving
//! the wire payload and a parser going the other way. Anything that does not parse becomes the
//! family's `Unknown` variant.
//!
//! Payloads travel inside frames, see [`frame`].

use std::fmt;

use tracing::debug;

use crate::common::{id_list_proc_string, AgentId, Direction, IdList, LifeSignals, Location};

pub mod frame;
pub mod info;
mod parser;

use info::{bool_str, GridInfo, SurroundInfo};
use parser::{ParseError, Tokens};

/// A command sent by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Handshake, carries the group name.
    Connect {
        /// Name of the team the agent belongs to.
        group: String,
    },
    /// Ends the agent's turn early.
    EndTurn,
    /// Moves one cell.
    Move(Direction),
    /// Asks for the content of a cell.
    Observe(Location),
    /// Rescues the survivor on top of the agent's cell.
    SaveSurv,
    /// Sends a message. An empty recipient list addresses everyone allowed.
    SendMessage {
        /// Recipients. `ID 0` addresses a whole group.
        recipients: Vec<AgentId>,
        #[allow(missing_docs)]
        message: String,
    },
    /// Recharges on a charging cell.
    Sleep,
    /// Digs the rubble on top of the agent's cell.
    TeamDig,
    /// Anything that could not be parsed.
    Unknown,
}

impl AgentCommand {
    /// True for the commands that use up the agent's action for the round.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            AgentCommand::Move(_)
                | AgentCommand::Observe(_)
                | AgentCommand::SaveSurv
                | AgentCommand::SendMessage { .. }
                | AgentCommand::Sleep
                | AgentCommand::TeamDig
        )
    }

    /// Replay-log form of the command when issued by `agent`.
    pub fn proc_string(&self, agent: AgentId) -> String {
        let action = match self {
            AgentCommand::Connect { .. } => "Connect".to_owned(),
            AgentCommand::EndTurn => "End Turn".to_owned(),
            AgentCommand::Move(direction) => format!("Move {direction}"),
            AgentCommand::Observe(location) => format!("Observe {}", location.proc_string()),
            AgentCommand::SaveSurv => "Save SV".to_owned(),
            AgentCommand::SendMessage {
                recipients,
                message,
            } => format!("Send {message} to {}", id_list_proc_string(recipients)),
            AgentCommand::Sleep => "Sleep".to_owned(),
            AgentCommand::TeamDig => "Team Dig".to_owned(),
            AgentCommand::Unknown => "??".to_owned(),
        };
        format!("{}#{action}", agent.proc_string())
    }
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentCommand::Connect { group } => write!(f, "CONNECT ( {group} )"),
            AgentCommand::EndTurn => f.write_str("END_TURN"),
            AgentCommand::Move(direction) => write!(f, "MOVE ( {direction} )"),
            AgentCommand::Observe(location) => write!(f, "OBSERVE {location}"),
            AgentCommand::SaveSurv => f.write_str("SAVE_SURV"),
            AgentCommand::SendMessage {
                recipients,
                message,
            } => write!(
                f,
                "SEND_MESSAGE ( NumTo {} , MsgSize {} , ID_List {} , MSG {message} )",
                recipients.len(),
                message.len(),
                IdList(recipients)
            ),
            AgentCommand::Sleep => f.write_str("SLEEP"),
            AgentCommand::TeamDig => f.write_str("TEAM_DIG"),
            AgentCommand::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// An agent command together with the identity of the agent that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCommand {
    /// Sender.
    pub agent: AgentId,
    /// What it asked for.
    pub command: AgentCommand,
}

impl IssuedCommand {
    /// Replay-log form.
    pub fn proc_string(&self) -> String {
        self.command.proc_string(self.agent)
    }
}

/// A message relayed by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedMessage {
    /// Sender.
    pub from: AgentId,
    /// Recipient list as the sender wrote it.
    pub recipients: Vec<AgentId>,
    #[allow(missing_docs)]
    pub message: String,
}

/// A command sent by the kernel.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AegisCommand {
    /// Handshake answer with the agent's identity and spawn.
    ConnectOk {
        id: AgentId,
        energy: u32,
        location: Location,
        /// Agent world file name, may be empty.
        file: String,
    },
    Disconnect,
    /// The agent died.
    DeathCard,
    RoundStart,
    RoundEnd,
    /// Opens a batch of forwarded messages.
    MessagesStart(usize),
    MessagesEnd,
    FwdMessage(ForwardedMessage),
    /// Opens the result envelope, `0` or `1` results follow.
    CmdResultStart(usize),
    CmdResultEnd,
    MoveResult {
        energy: u32,
        surround: SurroundInfo,
    },
    ObserveResult {
        energy: u32,
        grid: GridInfo,
        life_signals: LifeSignals,
    },
    SaveSurvResult {
        energy: u32,
        surround: SurroundInfo,
    },
    SleepResult {
        /// The recharge applied.
        success: bool,
        energy: u32,
    },
    TeamDigResult {
        energy: u32,
        surround: SurroundInfo,
    },
    Unknown,
}

impl fmt::Display for AegisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AegisCommand::ConnectOk {
                id,
                energy,
                location,
                file,
            } => write!(
                f,
                "CONNECT_OK ( ID {} , GID {} , ENG_LEV {energy} , LOC {location} , FILE {file} )",
                id.id, id.gid
            ),
            AegisCommand::Disconnect => f.write_str("DISCONNECT"),
            AegisCommand::DeathCard => f.write_str("DEATH_CARD"),
            AegisCommand::RoundStart => f.write_str("ROUND_START"),
            AegisCommand::RoundEnd => f.write_str("ROUND_END"),
            AegisCommand::MessagesStart(n) => write!(f, "MESSAGES_START ( {n} )"),
            AegisCommand::MessagesEnd => f.write_str("MESSAGES_END"),
            AegisCommand::FwdMessage(fwd) => write!(
                f,
                "FWD_MESSAGE ( IDFrom ( {} , {} ) , MsgSize {} , NUM_TO {} , IDS {} , MSG {} )",
                fwd.from.id,
                fwd.from.gid,
                fwd.message.len(),
                fwd.recipients.len(),
                IdList(&fwd.recipients),
                fwd.message
            ),
            AegisCommand::CmdResultStart(n) => write!(f, "CMD_RESULT_START ( {n} )"),
            AegisCommand::CmdResultEnd => f.write_str("CMD_RESULT_END"),
            AegisCommand::MoveResult { energy, surround } => {
                write!(f, "MOVE_RESULT ( ENG_LEV {energy} , {surround} )")
            }
            AegisCommand::ObserveResult {
                energy,
                grid,
                life_signals,
            } => write!(
                f,
                "OBSERVE_RESULT ( ENG_LEV {energy} , GRID_INFO ( {grid} ) , NUM_SIG {} , LIFE_SIG {life_signals} )",
                life_signals.len()
            ),
            AegisCommand::SaveSurvResult { energy, surround } => {
                write!(f, "SAVE_SURV_RESULT ( ENG_LEV {energy} , SUR_INFO {surround} )")
            }
            AegisCommand::SleepResult { success, energy } => write!(
                f,
                "SLEEP_RESULT ( RESULT {} , CH_ENG {energy} )",
                bool_str(*success)
            ),
            AegisCommand::TeamDigResult { energy, surround } => {
                write!(f, "TEAM_DIG_RESULT ( ENG_LEV {energy} , {surround} )")
            }
            AegisCommand::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Parses an agent payload. Malformed input gives [`AgentCommand::Unknown`].
pub fn parse_agent_command(payload: &str) -> AgentCommand {
    match read_agent_command(&mut Tokens::new(payload)) {
        Ok(command) => command,
        Err(e) => {
            debug!(%e, payload, "unparsable agent command");
            AgentCommand::Unknown
        }
    }
}

/// Parses a kernel payload. Malformed input gives [`AegisCommand::Unknown`].
pub fn parse_aegis_command(payload: &str) -> AegisCommand {
    match read_aegis_command(&mut Tokens::new(payload)) {
        Ok(command) => command,
        Err(e) => {
            debug!(%e, payload, "unparsable kernel command");
            AegisCommand::Unknown
        }
    }
}

fn read_agent_command(tokens: &mut Tokens) -> Result<AgentCommand, ParseError> {
    let command = match tokens.any("command")? {
        "CONNECT" => {
            tokens.text("(")?;
            let group = tokens.any("group name")?.to_owned();
            tokens.text(")")?;
            AgentCommand::Connect { group }
        }
        "END_TURN" => AgentCommand::EndTurn,
        "MOVE" => {
            tokens.text("(")?;
            let direction = tokens.direction()?;
            tokens.text(")")?;
            AgentCommand::Move(direction)
        }
        "OBSERVE" => AgentCommand::Observe(tokens.location()?),
        "SAVE_SURV" => AgentCommand::SaveSurv,
        "SEND_MESSAGE" => {
            tokens.text("(")?;
            let count: usize = tokens.field("NumTo")?;
            tokens.text(",")?;
            let size: usize = tokens.field("MsgSize")?;
            tokens.text(",")?;
            tokens.text("ID_List")?;
            let recipients = counted_ids(tokens, count)?;
            tokens.text(",")?;
            let message = tokens.message(size)?;
            tokens.text(")")?;
            AgentCommand::SendMessage {
                recipients,
                message,
            }
        }
        "SLEEP" => AgentCommand::Sleep,
        "TEAM_DIG" => AgentCommand::TeamDig,
        "UNKNOWN" => AgentCommand::Unknown,
        other => {
            return Err(ParseError::Unexpected {
                expected: "agent command".to_owned(),
                found: other.to_owned(),
                at: 0,
            })
        }
    };
    tokens.done()?;
    Ok(command)
}

fn read_aegis_command(tokens: &mut Tokens) -> Result<AegisCommand, ParseError> {
    let command = match tokens.any("command")? {
        "CONNECT_OK" => {
            tokens.text("(")?;
            let id = tokens.field("ID")?;
            tokens.text(",")?;
            let gid = tokens.field("GID")?;
            tokens.text(",")?;
            let energy = tokens.field("ENG_LEV")?;
            tokens.text(",")?;
            tokens.text("LOC")?;
            let location = tokens.location()?;
            tokens.text(",")?;
            tokens.text("FILE")?;
            let mut file = String::new();
            loop {
                match tokens.any(")")? {
                    ")" => break,
                    part => file.push_str(part),
                }
            }
            AegisCommand::ConnectOk {
                id: AgentId::new(id, gid),
                energy,
                location,
                file,
            }
        }
        "DISCONNECT" => AegisCommand::Disconnect,
        "DEATH_CARD" => AegisCommand::DeathCard,
        "ROUND_START" => AegisCommand::RoundStart,
        "ROUND_END" => AegisCommand::RoundEnd,
        "MESSAGES_START" => AegisCommand::MessagesStart(bracketed_count(tokens)?),
        "MESSAGES_END" => AegisCommand::MessagesEnd,
        "FWD_MESSAGE" => {
            tokens.text("(")?;
            tokens.text("IDFrom")?;
            tokens.text("(")?;
            let id = tokens.integer()?;
            tokens.text(",")?;
            let gid = tokens.integer()?;
            tokens.text(")")?;
            tokens.text(",")?;
            let size: usize = tokens.field("MsgSize")?;
            tokens.text(",")?;
            let count: usize = tokens.field("NUM_TO")?;
            tokens.text(",")?;
            tokens.text("IDS")?;
            let recipients = counted_ids(tokens, count)?;
            tokens.text(",")?;
            let message = tokens.message(size)?;
            tokens.text(")")?;
            AegisCommand::FwdMessage(ForwardedMessage {
                from: AgentId::new(id, gid),
                recipients,
                message,
            })
        }
        "CMD_RESULT_START" => AegisCommand::CmdResultStart(bracketed_count(tokens)?),
        "CMD_RESULT_END" => AegisCommand::CmdResultEnd,
        "MOVE_RESULT" => {
            let (energy, surround) = energy_and_surround(tokens, None)?;
            AegisCommand::MoveResult { energy, surround }
        }
        "TEAM_DIG_RESULT" => {
            let (energy, surround) = energy_and_surround(tokens, None)?;
            AegisCommand::TeamDigResult { energy, surround }
        }
        "SAVE_SURV_RESULT" => {
            let (energy, surround) = energy_and_surround(tokens, Some("SUR_INFO"))?;
            AegisCommand::SaveSurvResult { energy, surround }
        }
        "OBSERVE_RESULT" => {
            tokens.text("(")?;
            let energy = tokens.field("ENG_LEV")?;
            tokens.text(",")?;
            tokens.text("GRID_INFO")?;
            tokens.text("(")?;
            let grid = tokens.grid_info()?;
            tokens.text(")")?;
            tokens.text(",")?;
            let life_signals = tokens.counted_signals()?;
            tokens.text(")")?;
            AegisCommand::ObserveResult {
                energy,
                grid,
                life_signals,
            }
        }
        "SLEEP_RESULT" => {
            tokens.text("(")?;
            tokens.text("RESULT")?;
            let success = tokens.boolean()?;
            tokens.text(",")?;
            let energy = tokens.field("CH_ENG")?;
            tokens.text(")")?;
            AegisCommand::SleepResult { success, energy }
        }
        "UNKNOWN" => AegisCommand::Unknown,
        other => {
            return Err(ParseError::Unexpected {
                expected: "kernel command".to_owned(),
                found: other.to_owned(),
                at: 0,
            })
        }
    };
    tokens.done()?;
    Ok(command)
}

/// `( n )`
fn bracketed_count(tokens: &mut Tokens) -> Result<usize, ParseError> {
    tokens.text("(")?;
    let n = tokens.integer()?;
    tokens.text(")")?;
    Ok(n)
}

fn counted_ids(tokens: &mut Tokens, count: usize) -> Result<Vec<AgentId>, ParseError> {
    let ids = tokens.id_list()?;
    if ids.len() != count {
        return Err(ParseError::Unexpected {
            expected: format!("{count} identities"),
            found: ids.len().to_string(),
            at: 0,
        });
    }
    Ok(ids)
}

/// `( ENG_LEV e , [label] <surround> )`
fn energy_and_surround(
    tokens: &mut Tokens,
    label: Option<&str>,
) -> Result<(u32, SurroundInfo), ParseError> {
    tokens.text("(")?;
    let energy = tokens.field("ENG_LEV")?;
    tokens.text(",")?;
    if let Some(label) = label {
        tokens.text(label)?;
    }
    let surround = tokens.surround_info()?;
    tokens.text(")")?;
    Ok((energy, surround))
}
