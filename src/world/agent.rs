use crate::common::{AgentId, Direction, Location, DEFAULT_MAX_ENERGY_LEVEL};

/// An agent as the world sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub(crate) id: AgentId,
    pub(crate) location: Location,
    pub(crate) energy: u32,
    pub(crate) orientation: Direction,
    /// Wire form of the last command accepted for this agent.
    pub(crate) command_sent: Option<String>,
    pub(crate) steps: u32,
}

impl Agent {
    pub(crate) fn new(id: AgentId, location: Location, energy: u32) -> Self {
        Agent {
            id,
            location,
            energy: energy.min(DEFAULT_MAX_ENERGY_LEVEL),
            orientation: Direction::Center,
            command_sent: None,
            steps: 0,
        }
    }

    /// Identity.
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Current cell.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Current energy.
    pub fn energy(&self) -> u32 {
        self.energy
    }

    /// Direction of the last move.
    pub fn orientation(&self) -> Direction {
        self.orientation
    }

    /// Successful directional moves so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Wire form of the last accepted command.
    pub fn command_sent(&self) -> Option<&str> {
        self.command_sent.as_deref()
    }

    /// Clamped at 0.
    pub(crate) fn remove_energy(&mut self, amount: u32) {
        self.energy = self.energy.saturating_sub(amount);
    }

    /// Capped at the maximum level.
    pub(crate) fn add_energy(&mut self, amount: u32) {
        self.energy = self
            .energy
            .saturating_add(amount)
            .min(DEFAULT_MAX_ENERGY_LEVEL);
    }
}

#[cfg(test)]
mod agent_tests {
    use super::*;

    #[test]
    fn energy_is_clamped_both_ways() {
        let mut agent = Agent::new(AgentId::new(1, 1), Location::new(0, 0), 3);
        agent.remove_energy(10);
        assert_eq!(agent.energy(), 0);
        agent.add_energy(DEFAULT_MAX_ENERGY_LEVEL + 5);
        assert_eq!(agent.energy(), DEFAULT_MAX_ENERGY_LEVEL);
    }
}
