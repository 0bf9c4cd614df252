//! Recursive-descent reader over whitespace separated tokens.

use thiserror::Error;

use crate::common::{AgentId, Direction, GridKind, LifeSignals, Location};

use super::info::{CellInfo, GridInfo, ObjectInfo, SurroundInfo};

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ParseError {
    #[error("unexpected end of input, expected '{expected}'")]
    Eof { expected: String },
    #[error("expected '{expected}' at byte {at}, found '{found}'")]
    Unexpected {
        expected: String,
        found: String,
        at: usize,
    },
    #[error("trailing input at byte {at}")]
    Trailing { at: usize },
}

type ParseResult<T> = Result<T, ParseError>;

/// Cursor over a payload. Keeps byte offsets so message bodies can be sliced raw.
pub(crate) struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Tokens { src, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_whitespace()).len();
    }

    /// Next token and the byte offset where it starts.
    fn next_token(&mut self) -> Option<(usize, &'a str)> {
        self.skip_whitespace();
        if self.pos >= self.src.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.src[start..];
        let len = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        self.pos += len;
        Some((start, &rest[..len]))
    }

    fn peek_token(&mut self) -> Option<&'a str> {
        let saved = self.pos;
        let token = self.next_token().map(|(_, t)| t);
        self.pos = saved;
        token
    }

    pub(crate) fn any(&mut self, expected: &str) -> ParseResult<&'a str> {
        self.next_token()
            .map(|(_, t)| t)
            .ok_or_else(|| ParseError::Eof {
                expected: expected.to_owned(),
            })
    }

    pub(crate) fn text(&mut self, expected: &str) -> ParseResult<()> {
        match self.next_token() {
            Some((_, t)) if t == expected => Ok(()),
            Some((at, t)) => Err(ParseError::Unexpected {
                expected: expected.to_owned(),
                found: t.to_owned(),
                at,
            }),
            None => Err(ParseError::Eof {
                expected: expected.to_owned(),
            }),
        }
    }

    fn unexpected<T>(&self, expected: &str, found: &str, at: usize) -> ParseResult<T> {
        Err(ParseError::Unexpected {
            expected: expected.to_owned(),
            found: found.to_owned(),
            at,
        })
    }

    pub(crate) fn integer<T: std::str::FromStr>(&mut self) -> ParseResult<T> {
        let (at, token) = self.next_token().ok_or_else(|| ParseError::Eof {
            expected: "integer".to_owned(),
        })?;
        match token.parse() {
            Ok(v) => Ok(v),
            Err(_) => self.unexpected("integer", token, at),
        }
    }

    pub(crate) fn boolean(&mut self) -> ParseResult<bool> {
        let (at, token) = self.next_token().ok_or_else(|| ParseError::Eof {
            expected: "TRUE|FALSE".to_owned(),
        })?;
        match token {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => self.unexpected("TRUE|FALSE", token, at),
        }
    }

    pub(crate) fn direction(&mut self) -> ParseResult<Direction> {
        let (at, token) = self.next_token().ok_or_else(|| ParseError::Eof {
            expected: "direction".to_owned(),
        })?;
        match token.parse() {
            Ok(d) => Ok(d),
            Err(_) => self.unexpected("direction", token, at),
        }
    }

    /// `( X x , Y y )`
    pub(crate) fn location(&mut self) -> ParseResult<Location> {
        self.text("(")?;
        self.text("X")?;
        let x = self.integer()?;
        self.text(",")?;
        self.text("Y")?;
        let y = self.integer()?;
        self.text(")")?;
        Ok(Location::new(x, y))
    }

    /// `[ ID i , GID g ]`
    pub(crate) fn agent_id(&mut self) -> ParseResult<AgentId> {
        self.text("[")?;
        self.text("ID")?;
        let id = self.integer()?;
        self.text(",")?;
        self.text("GID")?;
        let gid = self.integer()?;
        self.text("]")?;
        Ok(AgentId::new(id, gid))
    }

    /// `( [ ID a , GID b ] , ... )` or `( )`.
    pub(crate) fn id_list(&mut self) -> ParseResult<Vec<AgentId>> {
        self.text("(")?;
        let mut ids = vec![];
        if self.peek_token() == Some(")") {
            self.text(")")?;
            return Ok(ids);
        }
        loop {
            ids.push(self.agent_id()?);
            let (at, token) = self.next_token().ok_or_else(|| ParseError::Eof {
                expected: ", or )".to_owned(),
            })?;
            match token {
                "," => continue,
                ")" => return Ok(ids),
                _ => return self.unexpected(", or )", token, at),
            }
        }
    }

    /// `( a , b , ... )`, `( )` when empty.
    pub(crate) fn life_signals(&mut self) -> ParseResult<LifeSignals> {
        self.text("(")?;
        let mut values = vec![];
        if self.peek_token() == Some(")") {
            self.text(")")?;
            return Ok(LifeSignals(values));
        }
        loop {
            values.push(self.integer()?);
            let (at, token) = self.next_token().ok_or_else(|| ParseError::Eof {
                expected: ", or )".to_owned(),
            })?;
            match token {
                "," => continue,
                ")" => return Ok(LifeSignals(values)),
                _ => return self.unexpected(", or )", token, at),
            }
        }
    }

    pub(crate) fn object_info(&mut self) -> ParseResult<ObjectInfo> {
        let (at, keyword) = self.next_token().ok_or_else(|| ParseError::Eof {
            expected: "layer".to_owned(),
        })?;
        let info = match keyword {
            "NO_LAYERS" => return Ok(ObjectInfo::NoLayers),
            "RUBBLE" => {
                self.text("(")?;
                let id = self.field("ID")?;
                self.text(",")?;
                let remove_agents = self.field("NUM_TO_RM")?;
                self.text(",")?;
                let remove_energy = self.field("RM_ENG")?;
                ObjectInfo::Rubble {
                    id,
                    remove_agents,
                    remove_energy,
                }
            }
            "SURVIVOR" => {
                self.text("(")?;
                let id = self.field("ID")?;
                self.text(",")?;
                let energy = self.field("ENG_LEV")?;
                self.text(",")?;
                let damage_factor = self.field("DMG_FAC")?;
                self.text(",")?;
                let body_mass = self.field("BDM")?;
                self.text(",")?;
                let mental_state = self.field("MS")?;
                ObjectInfo::Survivor {
                    id,
                    energy,
                    damage_factor,
                    body_mass,
                    mental_state,
                }
            }
            "SURVIVOR_GROUP" => {
                self.text("(")?;
                let id = self.field("ID")?;
                self.text(",")?;
                let number_of_survivors = self.field("NUM_SV")?;
                self.text(",")?;
                let energy = self.field("ENG_LV")?;
                ObjectInfo::SurvivorGroup {
                    id,
                    number_of_survivors,
                    energy,
                }
            }
            _ => return self.unexpected("layer", keyword, at),
        };
        self.text(")")?;
        Ok(info)
    }

    /// `NAME value`
    pub(crate) fn field<T: std::str::FromStr>(&mut self, name: &str) -> ParseResult<T> {
        self.text(name)?;
        self.integer()
    }

    pub(crate) fn grid_info(&mut self) -> ParseResult<GridInfo> {
        let (at, keyword) = self.next_token().ok_or_else(|| ParseError::Eof {
            expected: "grid".to_owned(),
        })?;
        if keyword == "NO_GRID" {
            return Ok(GridInfo::NoGrid);
        }
        let Some(kind) = GridKind::from_name(keyword) else {
            return self.unexpected("grid", keyword, at);
        };
        self.text("(")?;
        let x = self.field("X")?;
        self.text(",")?;
        let y = self.field("Y")?;
        self.text(",")?;
        self.text("ON_FIRE")?;
        let on_fire = self.boolean()?;
        self.text(",")?;
        let move_cost = self.field("MV_COST")?;
        self.text(",")?;
        let count: usize = self.field("NUM_AGT")?;
        self.text(",")?;
        self.text("ID_LIST")?;
        let agents = self.id_list()?;
        if agents.len() != count {
            return self.unexpected(&count.to_string(), &agents.len().to_string(), self.pos);
        }
        self.text(",")?;
        self.text("TOP_LAYER")?;
        self.text("(")?;
        let top_layer = self.object_info()?;
        self.text(")")?;
        self.text(")")?;
        Ok(GridInfo::Grid(CellInfo {
            kind,
            location: Location::new(x, y),
            on_fire,
            move_cost,
            agents,
            top_layer,
        }))
    }

    /// `( <grid> )`
    fn wrapped_grid(&mut self) -> ParseResult<GridInfo> {
        self.text("(")?;
        let grid = self.grid_info()?;
        self.text(")")?;
        Ok(grid)
    }

    /// `NUM_SIG n , LIFE_SIG ( ... )`
    pub(crate) fn counted_signals(&mut self) -> ParseResult<LifeSignals> {
        let count: usize = self.field("NUM_SIG")?;
        self.text(",")?;
        self.text("LIFE_SIG")?;
        let signals = self.life_signals()?;
        if signals.len() != count {
            return self.unexpected(&count.to_string(), &signals.len().to_string(), self.pos);
        }
        Ok(signals)
    }

    pub(crate) fn surround_info(&mut self) -> ParseResult<SurroundInfo> {
        self.text("CURR_GRID")?;
        let current = self.wrapped_grid()?;
        self.text(",")?;
        let life_signals = self.counted_signals()?;
        let mut neighbours: [GridInfo; 8] = Default::default();
        for (slot, direction) in neighbours.iter_mut().zip(Direction::COMPASS) {
            self.text(",")?;
            self.text(direction.name())?;
            *slot = self.wrapped_grid()?;
        }
        Ok(SurroundInfo {
            current,
            life_signals,
            neighbours,
        })
    }

    /// `MSG <len bytes>`. The body starts one byte after the keyword.
    pub(crate) fn message(&mut self, len: usize) -> ParseResult<String> {
        self.text("MSG")?;
        let start = self.pos + 1;
        let end = start + len;
        match self.src.get(start..end) {
            Some(body) => {
                self.pos = end;
                Ok(body.to_owned())
            }
            None => Err(ParseError::Eof {
                expected: format!("{len} message bytes"),
            }),
        }
    }

    pub(crate) fn done(&mut self) -> ParseResult<()> {
        match self.next_token() {
            None => Ok(()),
            Some((at, _)) => Err(ParseError::Trailing { at }),
        }
    }
}
