//! Small value types shared by the codec, the world and the kernel.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

/// Energy regained by one successful SLEEP.
pub const NORMAL_CHARGE: u32 = 5;
/// Energy an agent can never exceed.
pub const DEFAULT_MAX_ENERGY_LEVEL: u32 = 1000;
/// Well-known port agents connect to.
pub const AGENT_PORT: u16 = 6001;
/// Smallest allowed world side.
pub const WORLD_MIN: i32 = 3;
/// Largest allowed world side.
pub const WORLD_MAX: i32 = 30;

pub(crate) const DEPTH_LOW_START: u32 = 0;
pub(crate) const DEPTH_HIGH_START: u32 = 5;
pub(crate) const DEPTH_LOW_INC: u32 = 4;
pub(crate) const DEPTH_HIGH_INC: u32 = 5;

/// Identity of a connected agent.
///
/// Ordering is `(gid, id)`, so sorting a list of identities groups them by team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    /// Group id, assigned on first connection of a group name. Starts at 1.
    pub gid: u32,
    /// Member id within the group. Starts at 1, `0` is the group wildcard in recipient lists.
    pub id: u32,
}

impl AgentId {
    /// Creates an identity from a member id and a group id.
    pub fn new(id: u32, gid: u32) -> Self {
        AgentId { gid, id }
    }

    /// True for the `ID 0` wildcard that addresses a whole group.
    pub fn is_group_wildcard(&self) -> bool {
        self.id == 0
    }

    /// Replay-log form, `(id, gid)`.
    pub fn proc_string(&self) -> String {
        format!("({}, {})", self.id, self.gid)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ ID {} , GID {} ]", self.id, self.gid)
    }
}

/// Wire form of a list of identities: `( [ ID 1 , GID 1 ] , [ ID 2 , GID 1 ] )`, `( )` if empty.
pub(crate) struct IdList<'a>(pub &'a [AgentId]);

impl fmt::Display for IdList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("( )");
        }
        f.write_str("( ")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" , ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str(" )")
    }
}

/// Replay-log form of a recipient list. An empty list means "everyone".
pub(crate) fn id_list_proc_string(ids: &[AgentId]) -> String {
    if ids.is_empty() {
        return "all".to_owned();
    }
    let inner = ids
        .iter()
        .map(AgentId::proc_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("({inner})")
}

/// A grid coordinate. May lie off the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Location {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Location {
    /// Creates a location.
    pub fn new(x: i32, y: i32) -> Self {
        Location { x, y }
    }

    /// The neighbouring location in `direction`.
    pub fn add(self, direction: Direction) -> Location {
        let (dx, dy) = direction.delta();
        Location::new(self.x + dx, self.y + dy)
    }

    /// Replay-log form, `( x, y )`.
    pub fn proc_string(&self) -> String {
        format!("( {}, {} )", self.x, self.y)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "( X {} , Y {} )", self.x, self.y)
    }
}

/// The eight compass directions plus `Center`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    NorthWest,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    /// Stay in place.
    Center,
}

impl Direction {
    /// Every direction, `Center` last.
    pub const ALL: [Direction; 9] = [
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::Center,
    ];

    /// The eight neighbours, in the order they appear in a surround report.
    pub const COMPASS: [Direction; 8] = [
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
    ];

    /// Unit step `(dx, dy)`. North is `+y`.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::NorthWest => (-1, 1),
            Direction::North => (0, 1),
            Direction::NorthEast => (1, 1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, -1),
            Direction::South => (0, -1),
            Direction::SouthWest => (-1, -1),
            Direction::West => (-1, 0),
            Direction::Center => (0, 0),
        }
    }

    /// Wire name, e.g. `NORTH_WEST`.
    pub fn name(self) -> &'static str {
        match self {
            Direction::NorthWest => "NORTH_WEST",
            Direction::North => "NORTH",
            Direction::NorthEast => "NORTH_EAST",
            Direction::East => "EAST",
            Direction::SouthEast => "SOUTH_EAST",
            Direction::South => "SOUTH",
            Direction::SouthWest => "SOUTH_WEST",
            Direction::West => "WEST",
            Direction::Center => "CENTER",
        }
    }

    /// A uniformly drawn direction, `Center` included.
    pub fn random<R: Rng>(rng: &mut R) -> Direction {
        Direction::ALL[rng.random_range(0..Direction::ALL.len())]
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Direction::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown direction '{s}'"))
    }
}

/// Life signals of a cell's stack, top layer first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LifeSignals(pub Vec<u32>);

impl LifeSignals {
    /// Number of readings.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the stack was empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LifeSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" , ");
        write!(f, "( {joined} )")
    }
}

/// Terrain kind of a cell as reported to agents.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridKind {
    Normal,
    /// Agents recharge here with SLEEP.
    Charging,
    /// Burning. Kills agents at the end of the round.
    Fire,
    /// Kills agents at the end of the round.
    Killer,
}

impl GridKind {
    /// Wire name, e.g. `CHARGING_GRID`.
    pub fn name(self) -> &'static str {
        match self {
            GridKind::Normal => "NORMAL_GRID",
            GridKind::Charging => "CHARGING_GRID",
            GridKind::Fire => "FIRE_GRID",
            GridKind::Killer => "KILLER_GRID",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<GridKind> {
        [
            GridKind::Normal,
            GridKind::Charging,
            GridKind::Fire,
            GridKind::Killer,
        ]
        .into_iter()
        .find(|k| k.name() == name)
    }
}
