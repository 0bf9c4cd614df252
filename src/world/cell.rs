use crate::common::{AgentId, GridKind, Location};
use crate::world::layer::LayerRef;

/// One cell of the map.
#[derive(Debug, Clone)]
pub struct Cell {
    pub(crate) location: Location,
    pub(crate) kind: GridKind,
    pub(crate) move_cost: u32,
    /// Agents in arrival order.
    pub(crate) agents: Vec<AgentId>,
    /// Bottom first, the top layer is the last element.
    pub(crate) layers: Vec<LayerRef>,
}

impl Cell {
    pub(crate) fn new(location: Location) -> Self {
        Cell {
            location,
            kind: GridKind::Normal,
            move_cost: 1,
            agents: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Coordinates of the cell.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Terrain kind.
    pub fn kind(&self) -> GridKind {
        self.kind
    }

    /// Energy a directional move onto this cell costs.
    pub fn move_cost(&self) -> u32 {
        self.move_cost
    }

    /// Agents standing here.
    pub fn agents(&self) -> &[AgentId] {
        &self.agents
    }

    /// Number of layers in the stack.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Burning cells kill like killer cells and can spread.
    pub fn is_on_fire(&self) -> bool {
        self.kind == GridKind::Fire
    }

    /// Standing here at the end of a round is fatal.
    pub fn is_killer(&self) -> bool {
        matches!(self.kind, GridKind::Fire | GridKind::Killer)
    }

    /// Normal and charging cells.
    pub fn is_stable(&self) -> bool {
        !self.is_killer()
    }

    pub(crate) fn ignite(&mut self) {
        self.kind = GridKind::Fire;
    }

    pub(crate) fn top_layer(&self) -> Option<LayerRef> {
        self.layers.last().copied()
    }
}

#[cfg(test)]
mod cell_tests {
    use super::*;

    #[test]
    fn kinds_and_stability() {
        let mut cell = Cell::new(Location::new(1, 2));
        assert!(cell.is_stable());
        cell.kind = GridKind::Charging;
        assert!(cell.is_stable());
        cell.kind = GridKind::Killer;
        assert!(cell.is_killer() && !cell.is_on_fire());
        cell.ignite();
        assert!(cell.is_killer() && cell.is_on_fire());
        assert_eq!(cell.kind(), GridKind::Fire);
    }
}
