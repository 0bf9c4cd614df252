//! Connection registry: who is connected, in which group, and what is waiting for them.
//!
//! The [`AgentHandler`] owns every [`AgentConnection`], the groups and their scores, the turn
//! order, and two mailboxes per agent. Messages forwarded during a round go into the inactive
//! mailbox and only become deliverable after [`AgentHandler::swap_mailboxes`], which gives
//! exactly one round of latency.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, instrument, trace, warn};

use crate::common::AgentId;
use crate::configuration::Configuration;
use crate::error::{AgentCrashed, TransportFault};
use crate::protocol::{
    parse_agent_command, AegisCommand, AgentCommand, ForwardedMessage, IssuedCommand,
};
use crate::transport::AgentConnection;

const LISTEN_HOST: &str = "127.0.0.1";

/// A named team of agents and its rescue tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentGroup {
    /// Group id, from 1.
    pub gid: u32,
    /// Name sent in CONNECT.
    pub name: String,
    /// Survivors saved, alive and dead.
    pub number_saved: u32,
    /// Survivors saved alive.
    pub number_saved_alive: u32,
    /// Survivors saved dead.
    pub number_saved_dead: u32,
    next_member_id: u32,
    members: Vec<AgentId>,
}

impl AgentGroup {
    fn new(gid: u32, name: String) -> Self {
        AgentGroup {
            gid,
            name,
            number_saved: 0,
            number_saved_alive: 0,
            number_saved_dead: 0,
            next_member_id: 1,
            members: vec![],
        }
    }

    /// Currently connected members.
    pub fn members(&self) -> &[AgentId] {
        &self.members
    }
}

struct PendingMessage {
    message: ForwardedMessage,
    unread: usize,
}

struct AgentSlot {
    connection: AgentConnection,
    mailboxes: [VecDeque<u64>; 2],
    result: Option<AegisCommand>,
}

/// Registry of connected agents.
pub struct AgentHandler {
    port: u16,
    send_timeout: Duration,
    all_groups: bool,
    listener: Option<TcpListener>,
    slots: HashMap<AgentId, AgentSlot>,
    turn_order: Vec<AgentId>,
    current: usize,
    groups: Vec<AgentGroup>,
    messages: HashMap<u64, PendingMessage>,
    next_message_id: u64,
    /// Index of the mailbox delivered this round.
    active_mailbox: usize,
}

impl AgentHandler {
    /// Creates an empty registry. Nothing listens until [`listen`](Self::listen).
    pub fn new(config: &Configuration) -> Self {
        AgentHandler {
            port: config.port,
            send_timeout: config.send_timeout,
            all_groups: config.send_messages_to_all_groups,
            listener: None,
            slots: HashMap::new(),
            turn_order: vec![],
            current: 0,
            groups: vec![],
            messages: HashMap::new(),
            next_message_id: 0,
            active_mailbox: 0,
        }
    }

    /// Binds the listening socket. Port `0` picks an ephemeral port.
    #[instrument(skip(self), fields(port = self.port))]
    pub fn listen(&mut self) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind((LISTEN_HOST, self.port))
            .with_context(|| format!("kernel error: could not listen on port {}", self.port))?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening for agents");
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Address of the listening socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Waits up to `timeout` for one agent to connect and registers it.
    ///
    /// The caller answers with CONNECT_OK once it knows where the agent spawns.
    pub fn connect_agent(&mut self, timeout: Duration) -> anyhow::Result<Option<AgentId>> {
        let listener = self
            .listener
            .as_ref()
            .context("kernel error: not listening")?;
        let Some((connection, group_name)) =
            AgentConnection::accept(listener, timeout, self.send_timeout)?
        else {
            return Ok(None);
        };

        let gid = match self.groups.iter().find(|g| g.name == group_name) {
            Some(group) => group.gid,
            None => {
                let gid = self.groups.len() as u32 + 1;
                info!(gid, name = %group_name, "new group");
                self.groups.push(AgentGroup::new(gid, group_name));
                gid
            }
        };
        let Some(group) = self.group_mut(gid) else {
            return Ok(None);
        };
        let agent = AgentId::new(group.next_member_id, gid);
        group.next_member_id += 1;
        group.members.push(agent);

        self.slots.insert(
            agent,
            AgentSlot {
                connection,
                mailboxes: [VecDeque::new(), VecDeque::new()],
                result: None,
            },
        );
        self.turn_order.push(agent);
        info!(%agent, "agent connected");
        Ok(Some(agent))
    }

    /// Number of connected agents.
    pub fn agent_count(&self) -> usize {
        self.turn_order.len()
    }

    /// Connected agents in turn order.
    pub fn agents(&self) -> &[AgentId] {
        &self.turn_order
    }

    /// True if `agent` is registered.
    pub fn contains(&self, agent: AgentId) -> bool {
        self.slots.contains_key(&agent)
    }

    /// Groups in order of creation.
    pub fn groups(&self) -> &[AgentGroup] {
        &self.groups
    }

    /// Group with id `gid`.
    pub fn group(&self, gid: u32) -> Option<&AgentGroup> {
        self.groups.iter().find(|g| g.gid == gid)
    }

    fn group_mut(&mut self, gid: u32) -> Option<&mut AgentGroup> {
        self.groups.iter_mut().find(|g| g.gid == gid)
    }

    /// Adds `count` saved survivors to a group's tally.
    pub fn credit_saved(&mut self, gid: u32, count: u32, alive: bool) {
        let Some(group) = self.group_mut(gid) else {
            warn!(gid, "credit for unknown group");
            return;
        };
        group.number_saved += count;
        if alive {
            group.number_saved_alive += count;
        } else {
            group.number_saved_dead += count;
        }
        info!(
            gid,
            count,
            state = if alive { "alive" } else { "dead" },
            "group saved survivors"
        );
    }

    /// Restarts the turn order at the first agent.
    pub fn reset_current_agent(&mut self) {
        self.current = 0;
    }

    /// Agent whose turn it is, `None` once every agent had its turn.
    pub fn current_agent(&self) -> Option<AgentId> {
        self.turn_order.get(self.current).copied()
    }

    /// Moves the turn to the next agent.
    pub fn move_to_next_agent(&mut self) {
        if self.current < self.turn_order.len() {
            self.current += 1;
        }
    }

    /// Sends one command to `agent`.
    pub fn send_to(&mut self, agent: AgentId, command: &AegisCommand) -> Result<(), AgentCrashed> {
        let slot = self.slots.get_mut(&agent).ok_or(AgentCrashed {
            agent,
            fault: TransportFault::Disconnected,
        })?;
        slot.connection
            .send(&command.to_string())
            .map_err(|fault| {
                warn!(%agent, %fault, %command, "send failed");
                AgentCrashed { agent, fault }
            })
    }

    /// Sends one command to the agent whose turn it is.
    pub fn send_to_current(&mut self, command: &AegisCommand) -> Result<(), AgentCrashed> {
        match self.current_agent() {
            Some(agent) => self.send_to(agent, command),
            None => Ok(()),
        }
    }

    /// Sends one command to every agent, returning those that failed.
    pub fn send_to_all(&mut self, command: &AegisCommand) -> Vec<AgentCrashed> {
        let agents = self.turn_order.clone();
        agents
            .into_iter()
            .filter_map(|agent| self.send_to(agent, command).err())
            .collect()
    }

    /// Reads at most one command from the current agent.
    ///
    /// `Ok(None)` means nothing arrived in time. Undecodable payloads are returned as
    /// [`AgentCommand::Unknown`].
    pub fn read_command_of_current(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<IssuedCommand>, AgentCrashed> {
        let Some(agent) = self.current_agent() else {
            return Ok(None);
        };
        let slot = self.slots.get_mut(&agent).ok_or(AgentCrashed {
            agent,
            fault: TransportFault::Disconnected,
        })?;
        match slot.connection.receive(timeout) {
            Ok(Some(payload)) => {
                let command = parse_agent_command(&payload);
                if command == AgentCommand::Unknown {
                    warn!(%agent, %payload, "unknown command");
                }
                Ok(Some(IssuedCommand { agent, command }))
            }
            Ok(None) => Ok(None),
            Err(fault) => {
                warn!(%agent, %fault, "read failed");
                Err(AgentCrashed { agent, fault })
            }
        }
    }

    /// Stores the result to deliver to `agent` next round, replacing any earlier one.
    pub fn set_result(&mut self, agent: AgentId, result: AegisCommand) {
        if let Some(slot) = self.slots.get_mut(&agent) {
            slot.result = Some(result);
        }
    }

    /// Delivers the stored result inside a `CMD_RESULT_START`/`CMD_RESULT_END` envelope.
    pub fn flush_result(&mut self, agent: AgentId) -> Result<(), AgentCrashed> {
        let result = self.slots.get_mut(&agent).and_then(|slot| slot.result.take());
        match result {
            Some(result) => {
                self.send_to(agent, &AegisCommand::CmdResultStart(1))?;
                self.send_to(agent, &result)?;
            }
            None => self.send_to(agent, &AegisCommand::CmdResultStart(0))?,
        }
        self.send_to(agent, &AegisCommand::CmdResultEnd)
    }

    /// Delivers the active mailbox of `agent` and empties it.
    pub fn flush_messages(&mut self, agent: AgentId) -> Result<(), AgentCrashed> {
        let ids: Vec<u64> = match self.slots.get_mut(&agent) {
            Some(slot) => slot.mailboxes[self.active_mailbox].drain(..).collect(),
            None => vec![],
        };
        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pending) = self.messages.get_mut(&id) {
                pending.unread = pending.unread.saturating_sub(1);
                batch.push(AegisCommand::FwdMessage(pending.message.clone()));
            }
        }
        trace!(%agent, count = batch.len(), "delivering messages");
        self.send_to(agent, &AegisCommand::MessagesStart(batch.len()))?;
        for message in &batch {
            self.send_to(agent, message)?;
        }
        self.send_to(agent, &AegisCommand::MessagesEnd)
    }

    fn store(&mut self, message: ForwardedMessage) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.messages.insert(id, PendingMessage { message, unread: 0 });
        id
    }

    fn enqueue(&mut self, message_id: u64, recipient: AgentId) {
        let inactive = 1 - self.active_mailbox;
        let Some(slot) = self.slots.get_mut(&recipient) else {
            return;
        };
        slot.mailboxes[inactive].push_back(message_id);
        if let Some(pending) = self.messages.get_mut(&message_id) {
            pending.unread += 1;
        }
    }

    /// Routes a SEND_MESSAGE from `from`.
    ///
    /// An empty recipient list addresses every agent when cross-group delivery is enabled,
    /// otherwise the sender's group.
    pub fn forward_message(&mut self, from: AgentId, recipients: Vec<AgentId>, message: String) {
        let fwd = ForwardedMessage {
            from,
            recipients,
            message,
        };
        if !fwd.recipients.is_empty() {
            self.forward_by_recipient_list(fwd);
        } else if self.all_groups {
            self.forward_to_all(fwd);
        } else {
            self.forward_to_group(from.gid, fwd);
        }
    }

    /// Queues `message` for every connected agent.
    pub fn forward_to_all(&mut self, message: ForwardedMessage) {
        let id = self.store(message);
        for agent in self.turn_order.clone() {
            self.enqueue(id, agent);
        }
    }

    /// Queues `message` for every connected member of group `gid`.
    pub fn forward_to_group(&mut self, gid: u32, message: ForwardedMessage) {
        let id = self.store(message);
        self.enqueue_group(id, gid);
    }

    fn enqueue_group(&mut self, message_id: u64, gid: u32) {
        let members = self
            .group(gid)
            .map(|g| g.members.clone())
            .unwrap_or_default();
        for agent in members {
            self.enqueue(message_id, agent);
        }
    }

    /// Queues `message` for each entry of its recipient list.
    ///
    /// `ID 0` entries expand to the whole group. Entries outside the sender's group are dropped
    /// unless cross-group delivery is enabled.
    pub fn forward_by_recipient_list(&mut self, message: ForwardedMessage) {
        let from = message.from;
        let recipients = message.recipients.clone();
        let id = self.store(message);
        for recipient in recipients {
            if !self.all_groups && recipient.gid != from.gid {
                debug!(%from, %recipient, "cross-group message dropped");
                continue;
            }
            if recipient.is_group_wildcard() {
                self.enqueue_group(id, recipient.gid);
            } else {
                self.enqueue(id, recipient);
            }
        }
    }

    /// Number of messages not yet read by all their recipients.
    pub fn outstanding_messages(&self) -> usize {
        self.messages.len()
    }

    /// Makes this round's forwards deliverable and purges fully read messages.
    pub fn swap_mailboxes(&mut self) {
        self.messages.retain(|_, pending| pending.unread > 0);
        self.active_mailbox = 1 - self.active_mailbox;
    }

    /// Disconnects and forgets `agent`. Messages waiting for it count as read.
    pub fn remove_agent(&mut self, agent: AgentId) {
        let Some(mut slot) = self.slots.remove(&agent) else {
            return;
        };
        slot.connection.disconnect();
        for mailbox in &slot.mailboxes {
            for id in mailbox {
                if let Some(pending) = self.messages.get_mut(id) {
                    pending.unread = pending.unread.saturating_sub(1);
                }
            }
        }
        self.messages.retain(|_, pending| pending.unread > 0);

        if let Some(index) = self.turn_order.iter().position(|a| *a == agent) {
            self.turn_order.remove(index);
            if index < self.current {
                self.current -= 1;
            }
        }
        if let Some(group) = self.group_mut(agent.gid) {
            group.members.retain(|a| *a != agent);
        }
        info!(%agent, "agent removed");
    }

    /// One line per group: `( GID g ) NAME n = ( saved , alive , dead );`.
    pub fn group_summary(&self) -> String {
        let mut summary = String::new();
        for group in &self.groups {
            let _ = writeln!(
                summary,
                "( GID {} ) NAME {} = ( {} , {} , {} );",
                group.gid,
                group.name,
                group.number_saved,
                group.number_saved_alive,
                group.number_saved_dead
            );
        }
        summary
    }

    /// Sends DISCONNECT to everyone, closes every socket and the listener, then resets.
    #[instrument(skip_all)]
    pub fn shutdown(&mut self) {
        let failed = self.send_to_all(&AegisCommand::Disconnect);
        for crash in failed {
            debug!(%crash, "DISCONNECT not delivered");
        }
        for slot in self.slots.values_mut() {
            slot.connection.disconnect();
        }
        for line in self.group_summary().lines() {
            info!("{line}");
        }
        self.listener = None;
        self.reset();
    }

    #[cfg(test)]
    pub(crate) fn add_group_for_tests(&mut self, gid: u32) {
        self.groups.push(AgentGroup::new(gid, format!("group{gid}")));
    }

    /// Back to the freshly created state, keeping the settings.
    pub fn reset(&mut self) {
        self.listener = None;
        self.slots.clear();
        self.turn_order.clear();
        self.current = 0;
        self.groups.clear();
        self.messages.clear();
        self.next_message_id = 0;
        self.active_mailbox = 0;
    }
}

#[cfg(test)]
mod registry_tests {
    use std::thread;

    use super::*;
    use crate::protocol::parse_aegis_command;

    fn handler(all_groups: bool) -> AgentHandler {
        let config = Configuration::new()
            .with_port(0)
            .with_send_messages_to_all_groups(all_groups);
        let mut handler = AgentHandler::new(&config);
        handler.listen().unwrap();
        handler
    }

    /// Connects one agent per group name and returns the client ends.
    fn connect_all(handler: &mut AgentHandler, groups: &[&str]) -> Vec<AgentConnection> {
        let addr = handler.local_addr().unwrap();
        let mut clients = vec![];
        for group in groups {
            let name = group.to_string();
            let client = thread::spawn(move || {
                let mut c = AgentConnection::connect(addr, Duration::from_millis(100)).unwrap();
                c.send(&format!("CONNECT ( {name} )")).unwrap();
                c
            });
            handler
                .connect_agent(Duration::from_secs(2))
                .unwrap()
                .expect("agent connects");
            clients.push(client.join().unwrap());
        }
        clients
    }

    fn read_all(client: &mut AgentConnection) -> Vec<AegisCommand> {
        let mut out = vec![];
        while let Ok(Some(payload)) = client.receive(Duration::from_millis(50)) {
            out.push(parse_aegis_command(&payload));
        }
        out
    }

    #[test]
    fn ids_are_assigned_per_group() {
        let mut handler = handler(true);
        connect_all(&mut handler, &["a", "b", "a"]);
        assert_eq!(
            handler.agents(),
            &[AgentId::new(1, 1), AgentId::new(1, 2), AgentId::new(2, 1)]
        );
        assert_eq!(handler.groups()[0].name, "a");
        assert_eq!(handler.group(2).unwrap().name, "b");
    }

    #[test]
    fn messages_arrive_one_round_later() {
        let mut handler = handler(true);
        let mut clients = connect_all(&mut handler, &["a", "a"]);
        let sender = AgentId::new(1, 1);
        let receiver = AgentId::new(2, 1);

        handler.forward_message(sender, vec![receiver], "hello".to_owned());
        handler.flush_messages(receiver).unwrap();
        assert_eq!(
            read_all(&mut clients[1]),
            vec![AegisCommand::MessagesStart(0), AegisCommand::MessagesEnd]
        );

        handler.swap_mailboxes();
        handler.flush_messages(receiver).unwrap();
        let delivered = read_all(&mut clients[1]);
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[0], AegisCommand::MessagesStart(1));
        assert!(matches!(&delivered[1], AegisCommand::FwdMessage(m) if m.message == "hello"));

        // read by everyone, purged on the next swap
        handler.swap_mailboxes();
        assert_eq!(handler.outstanding_messages(), 0);
        handler.flush_messages(receiver).unwrap();
        assert_eq!(read_all(&mut clients[1]).len(), 2);
    }

    #[test]
    fn group_wildcard_respects_the_fan_out_policy() {
        let mut handler = handler(false);
        let mut clients = connect_all(&mut handler, &["a", "b", "a"]);
        let sender = AgentId::new(1, 1);
        handler.forward_message(
            sender,
            vec![AgentId::new(0, 1), AgentId::new(0, 2)],
            "x".to_owned(),
        );
        handler.swap_mailboxes();
        for agent in handler.agents().to_vec() {
            handler.flush_messages(agent).unwrap();
        }
        assert_eq!(read_all(&mut clients[0])[0], AegisCommand::MessagesStart(1));
        assert_eq!(read_all(&mut clients[1])[0], AegisCommand::MessagesStart(0));
        assert_eq!(read_all(&mut clients[2])[0], AegisCommand::MessagesStart(1));
    }

    #[test]
    fn empty_recipient_list_stays_in_group_without_cross_group_delivery() {
        let mut handler = handler(false);
        connect_all(&mut handler, &["a", "b"]);
        handler.forward_message(AgentId::new(1, 1), vec![], "x".to_owned());
        let inactive = 1 - handler.active_mailbox;
        assert_eq!(handler.slots[&AgentId::new(1, 1)].mailboxes[inactive].len(), 1);
        assert!(handler.slots[&AgentId::new(1, 2)].mailboxes[inactive].is_empty());
    }

    #[test]
    fn removing_a_recipient_purges_its_messages() {
        let mut handler = handler(true);
        connect_all(&mut handler, &["a", "a"]);
        handler.forward_message(AgentId::new(1, 1), vec![AgentId::new(2, 1)], "x".to_owned());
        assert_eq!(handler.outstanding_messages(), 1);
        handler.remove_agent(AgentId::new(2, 1));
        assert_eq!(handler.outstanding_messages(), 0);
        assert_eq!(handler.agents(), &[AgentId::new(1, 1)]);
        assert!(handler.group(1).unwrap().members().len() == 1);
    }

    #[test]
    fn result_envelope() {
        let mut handler = handler(true);
        let mut clients = connect_all(&mut handler, &["a"]);
        let agent = AgentId::new(1, 1);
        handler.flush_result(agent).unwrap();
        assert_eq!(
            read_all(&mut clients[0]),
            vec![AegisCommand::CmdResultStart(0), AegisCommand::CmdResultEnd]
        );
        let sleep = AegisCommand::SleepResult {
            success: false,
            energy: 4,
        };
        handler.set_result(agent, sleep.clone());
        handler.flush_result(agent).unwrap();
        assert_eq!(
            read_all(&mut clients[0]),
            vec![
                AegisCommand::CmdResultStart(1),
                sleep,
                AegisCommand::CmdResultEnd
            ]
        );
    }

    #[test]
    fn crashed_agent_is_reported() {
        let mut handler = handler(true);
        let clients = connect_all(&mut handler, &["a"]);
        drop(clients);
        let crash = handler
            .read_command_of_current(Duration::from_millis(500))
            .unwrap_err();
        assert_eq!(crash.agent, AgentId::new(1, 1));
    }

    #[test]
    fn turn_order_survives_removal() {
        let mut handler = handler(true);
        connect_all(&mut handler, &["a", "a", "a"]);
        handler.reset_current_agent();
        handler.move_to_next_agent();
        handler.remove_agent(AgentId::new(1, 1));
        assert_eq!(handler.current_agent(), Some(AgentId::new(2, 1)));
        handler.move_to_next_agent();
        handler.move_to_next_agent();
        assert_eq!(handler.current_agent(), None);
    }

    #[test]
    fn summary_and_shutdown() {
        let mut handler = handler(true);
        let mut clients = connect_all(&mut handler, &["team"]);
        handler.credit_saved(1, 2, true);
        handler.credit_saved(1, 1, false);
        assert_eq!(
            handler.group_summary(),
            "( GID 1 ) NAME team = ( 3 , 2 , 1 );\n"
        );
        handler.shutdown();
        assert_eq!(read_all(&mut clients[0]), vec![AegisCommand::Disconnect]);
        assert_eq!(handler.agent_count(), 0);
        assert!(handler.groups().is_empty());
        assert!(handler.local_addr().is_none());
    }
}
