//! Config for the kernel behaviors
//!
//! This module provides the options controlling how the kernel runs a simulation: message
//! policies, scoring, timing and the round limit.
//!
//! Configuration can be created programmatically using [`Configuration::new()`], by reading
//! environment variables using [`Configuration::from_env()`], or from the JSON layout of an
//! `aegis_config.json` file using [`Configuration::from_json_str()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive, set the value to `"true"` to enable one.
//! Numbers that do not parse keep their default.
//!
//! - `AEGIS_SEND_AND_ACT`: SEND_MESSAGE is forwarded at once and does not use the action (default: `false`)
//! - `AEGIS_ALL_GROUPS`: messages may cross groups (default: `true`)
//! - `AEGIS_SLEEP_EVERYWHERE`: SLEEP recharges on any cell (default: `false`)
//! - `AEGIS_SAVE_STRATEGY`: `ALL`, `RANDOM` or `COUNT` (default: `ALL`)
//! - `AEGIS_TIE_STRATEGY`: `C_ALL` or `C_RANDOM`, used by `COUNT` (default: `C_ALL`)
//! - `AEGIS_MOVE_COST`: cells keep their movement cost (default: `true`)
//! - `AEGIS_FIRE_SPREAD`: fire spreads every round (default: `false`)
//! - `AEGIS_ROUNDS`: round limit (default: `500`)
//! - `AEGIS_AGENTS`: number of agents to wait for (default: `1`)
//! - `AEGIS_PORT`: listening port (default: `6001`)
//! - `AEGIS_COMMAND_WAIT_MS`: time an agent has to send its command (default: `1250`)
//! - `AEGIS_CONNECT_WAIT_MS`: time an agent has to connect (default: `5000`)
//! - `AEGIS_SEND_TIMEOUT_MS`: bound on a single send (default: `100`)
//! - `AEGIS_IDLE_SECS`: how long to wait for the first agent (default: `300`)
//! - `AEGIS_WORLD_FILE_NAME`: world file name sent in CONNECT_OK (default: empty)
//! - `AEGIS_LOG`: enable logging to a file (default: `false`)

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::common::AGENT_PORT;
use crate::error::ConfigurationError;

/// Who scores when several groups rescue the same survivor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStrategy {
    /// Every participating group.
    All,
    /// One participating group, drawn at random.
    Random,
    /// The group with the most participants, ties broken by [`TieStrategy`].
    Count,
}

impl FromStr for SaveStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(SaveStrategy::All),
            "RANDOM" => Ok(SaveStrategy::Random),
            "COUNT" => Ok(SaveStrategy::Count),
            _ => Err(ConfigurationError::InvalidOption {
                option: "save strategy",
                value: s.to_owned(),
            }),
        }
    }
}

/// Tie break of [`SaveStrategy::Count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieStrategy {
    /// Every group tied at the largest size scores.
    All,
    /// One of them, drawn at random.
    Random,
}

impl FromStr for TieStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "C_ALL" => Ok(TieStrategy::All),
            "C_RANDOM" => Ok(TieStrategy::Random),
            _ => Err(ConfigurationError::InvalidOption {
                option: "tie strategy",
                value: s.to_owned(),
            }),
        }
    }
}

/// Configuration for kernel behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) send_and_act: bool,
    pub(crate) send_messages_to_all_groups: bool,
    pub(crate) sleep_everywhere: bool,
    pub(crate) save_strategy: SaveStrategy,
    pub(crate) tie_strategy: TieStrategy,
    pub(crate) move_cost_enabled: bool,
    pub(crate) fire_spread: bool,
    pub(crate) rounds: u32,
    pub(crate) expected_agents: usize,
    pub(crate) port: u16,
    pub(crate) command_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) send_timeout: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) save_surv_cost: u32,
    pub(crate) team_dig_cost: u32,
    pub(crate) move_cost: u32,
    pub(crate) observe_cost: u32,
    pub(crate) world_file_name: String,
    pub(crate) log: bool,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(rename = "Send_Message")]
    send_message: Option<SendMessageSection>,
    #[serde(rename = "Sleep_On_Every")]
    sleep_on_every: Option<bool>,
    #[serde(rename = "Save_Surv")]
    save_surv: Option<SaveSurvSection>,
    #[serde(rename = "Enable_Move_Cost")]
    enable_move_cost: Option<bool>,
    #[serde(rename = "Fire_Spread")]
    fire_spread: Option<bool>,
}

#[derive(Deserialize)]
struct SendMessageSection {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Deserialize)]
struct SaveSurvSection {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    tie_strategy: Option<String>,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - A SEND_MESSAGE is the agent's action for the round.
    /// - Messages may be sent to any group.
    /// - SLEEP only recharges on charging cells.
    /// - Every group taking part in a rescue scores (`ALL`, tie break `C_ALL`).
    /// - Movement costs are enabled, fire does not spread.
    /// - 500 rounds, one expected agent, port 6001.
    /// - Agents get 1250 ms per command and 5000 ms to connect, sends are bounded by 100 ms
    ///   and the kernel waits 300 s for a first agent.
    /// - Every flat action cost is 1.
    pub fn new() -> Self {
        Self {
            send_and_act: false,
            send_messages_to_all_groups: true,
            sleep_everywhere: false,
            save_strategy: SaveStrategy::All,
            tie_strategy: TieStrategy::All,
            move_cost_enabled: true,
            fire_spread: false,
            rounds: 500,
            expected_agents: 1,
            port: AGENT_PORT,
            command_timeout: Duration::from_millis(1250),
            connect_timeout: Duration::from_millis(5000),
            send_timeout: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(300),
            save_surv_cost: 1,
            team_dig_cost: 1,
            move_cost: 1,
            observe_cost: 1,
            world_file_name: String::new(),
            log: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Any variable that is
    /// unset or unparsable results in the default value for its field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_parsed<T: FromStr>(var: &str, default: T) -> T {
            match std::env::var(var) {
                Ok(val) => val.trim().parse().unwrap_or_else(|_| {
                    warn!(var, value = %val, "unparsable value, using default");
                    default
                }),
                Err(_) => default,
            }
        }

        let defaults = Self::new();
        Self {
            send_and_act: get_env_flag("AEGIS_SEND_AND_ACT", defaults.send_and_act),
            send_messages_to_all_groups: get_env_flag(
                "AEGIS_ALL_GROUPS",
                defaults.send_messages_to_all_groups,
            ),
            sleep_everywhere: get_env_flag("AEGIS_SLEEP_EVERYWHERE", defaults.sleep_everywhere),
            save_strategy: get_env_parsed("AEGIS_SAVE_STRATEGY", defaults.save_strategy),
            tie_strategy: get_env_parsed("AEGIS_TIE_STRATEGY", defaults.tie_strategy),
            move_cost_enabled: get_env_flag("AEGIS_MOVE_COST", defaults.move_cost_enabled),
            fire_spread: get_env_flag("AEGIS_FIRE_SPREAD", defaults.fire_spread),
            rounds: get_env_parsed("AEGIS_ROUNDS", defaults.rounds),
            expected_agents: get_env_parsed("AEGIS_AGENTS", defaults.expected_agents),
            port: get_env_parsed("AEGIS_PORT", defaults.port),
            command_timeout: Duration::from_millis(get_env_parsed("AEGIS_COMMAND_WAIT_MS", 1250)),
            connect_timeout: Duration::from_millis(get_env_parsed("AEGIS_CONNECT_WAIT_MS", 5000)),
            send_timeout: Duration::from_millis(get_env_parsed("AEGIS_SEND_TIMEOUT_MS", 100)),
            idle_timeout: Duration::from_secs(get_env_parsed("AEGIS_IDLE_SECS", 300)),
            world_file_name: std::env::var("AEGIS_WORLD_FILE_NAME").unwrap_or_default(),
            log: get_env_flag("AEGIS_LOG", defaults.log),
            ..defaults
        }
    }

    /// Create configuration from an `aegis_config.json` document, other options at their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        Self::new().with_json_str(json)
    }

    /// Applies the settings of an `aegis_config.json` document on top of `self`.
    ///
    /// Unknown strategy names fall back to `ALL` and `C_ALL`.
    pub fn with_json_str(mut self, json: &str) -> Result<Self, ConfigurationError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        if let Some(send) = file.send_message {
            self.send_and_act = send.enabled;
            self.send_messages_to_all_groups = send.target.as_deref() != Some("SINGLE_GROUP");
        }
        if let Some(sleep) = file.sleep_on_every {
            self.sleep_everywhere = sleep;
        }
        if let Some(save) = file.save_surv {
            let strategy = save.strategy.as_deref().unwrap_or("ALL");
            self.save_strategy = strategy.parse().unwrap_or_else(|e| {
                warn!(%e, "using ALL");
                SaveStrategy::All
            });
            if self.save_strategy == SaveStrategy::Count {
                if let Some(tie) = save.tie_strategy.as_deref() {
                    self.tie_strategy = tie.parse().unwrap_or_else(|e| {
                        warn!(%e, "using C_ALL");
                        TieStrategy::All
                    });
                }
            }
        }
        if let Some(move_cost) = file.enable_move_cost {
            self.move_cost_enabled = move_cost;
        }
        if let Some(fire) = file.fire_spread {
            self.fire_spread = fire;
        }
        Ok(self)
    }

    /// Forward SEND_MESSAGE at once and keep the agent's action for the round.
    pub fn with_send_and_act(mut self, value: bool) -> Self {
        self.send_and_act = value;
        self
    }

    /// Allow or forbid messages between groups.
    pub fn with_send_messages_to_all_groups(mut self, value: bool) -> Self {
        self.send_messages_to_all_groups = value;
        self
    }

    /// Let SLEEP recharge on every cell.
    pub fn with_sleep_everywhere(mut self, value: bool) -> Self {
        self.sleep_everywhere = value;
        self
    }

    /// Set the rescue scoring strategy.
    pub fn with_save_strategy(mut self, value: SaveStrategy) -> Self {
        self.save_strategy = value;
        self
    }

    /// Set the tie break used by [`SaveStrategy::Count`].
    pub fn with_tie_strategy(mut self, value: TieStrategy) -> Self {
        self.tie_strategy = value;
        self
    }

    /// Enable or disable per-cell movement costs.
    pub fn with_move_cost_enabled(mut self, value: bool) -> Self {
        self.move_cost_enabled = value;
        self
    }

    /// Enable or disable fire spread.
    pub fn with_fire_spread(mut self, value: bool) -> Self {
        self.fire_spread = value;
        self
    }

    /// Set the round limit.
    pub fn with_rounds(mut self, value: u32) -> Self {
        self.rounds = value;
        self
    }

    /// Set how many agents the kernel waits for.
    pub fn with_expected_agents(mut self, value: usize) -> Self {
        self.expected_agents = value;
        self
    }

    /// Set the listening port. `0` picks a free one.
    pub fn with_port(mut self, value: u16) -> Self {
        self.port = value;
        self
    }

    /// Time an agent has to send its command each round.
    pub fn with_command_timeout(mut self, value: Duration) -> Self {
        self.command_timeout = value;
        self
    }

    /// Time an agent has to connect.
    pub fn with_connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Bound on a single send.
    pub fn with_send_timeout(mut self, value: Duration) -> Self {
        self.send_timeout = value;
        self
    }

    /// How long to wait for the first agent before giving up.
    pub fn with_idle_timeout(mut self, value: Duration) -> Self {
        self.idle_timeout = value;
        self
    }

    /// Energy charged to every agent taking part in a rescue.
    pub fn with_save_surv_cost(mut self, value: u32) -> Self {
        self.save_surv_cost = value;
        self
    }

    /// Energy charged per failed dig.
    pub fn with_team_dig_cost(mut self, value: u32) -> Self {
        self.team_dig_cost = value;
        self
    }

    /// Energy charged for a move that goes nowhere.
    pub fn with_move_cost(mut self, value: u32) -> Self {
        self.move_cost = value;
        self
    }

    /// Energy charged per OBSERVE.
    pub fn with_observe_cost(mut self, value: u32) -> Self {
        self.observe_cost = value;
        self
    }

    /// World file name reported in CONNECT_OK.
    pub fn with_world_file_name(mut self, value: impl Into<String>) -> Self {
        self.world_file_name = value.into();
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether logging to file is requested.
    pub fn log(&self) -> bool {
        self.log
    }

    /// Whether cells keep their movement cost.
    pub fn move_cost_enabled(&self) -> bool {
        self.move_cost_enabled
    }

    /// Round limit.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod configuration_tests {
    use super::*;

    #[test]
    fn json_overrides_defaults() {
        let json = r#"{
            "Send_Message": { "enabled": true, "target": "SINGLE_GROUP" },
            "Sleep_On_Every": true,
            "Save_Surv": { "strategy": "COUNT", "tie_strategy": "C_RANDOM" },
            "Enable_Move_Cost": false,
            "Fire_Spread": true
        }"#;
        let config = Configuration::from_json_str(json).unwrap();
        assert!(config.send_and_act);
        assert!(!config.send_messages_to_all_groups);
        assert!(config.sleep_everywhere);
        assert_eq!(config.save_strategy, SaveStrategy::Count);
        assert_eq!(config.tie_strategy, TieStrategy::Random);
        assert!(!config.move_cost_enabled);
        assert!(config.fire_spread);
        assert_eq!(config.rounds, 500);
    }

    #[test]
    fn tie_strategy_only_applies_to_count() {
        let json = r#"{ "Save_Surv": { "strategy": "RANDOM", "tie_strategy": "C_RANDOM" } }"#;
        let config = Configuration::from_json_str(json).unwrap();
        assert_eq!(config.save_strategy, SaveStrategy::Random);
        assert_eq!(config.tie_strategy, TieStrategy::All);
    }

    #[test]
    fn unknown_strategy_falls_back() {
        let json = r#"{ "Save_Surv": { "strategy": "BEST" } }"#;
        let config = Configuration::from_json_str(json).unwrap();
        assert_eq!(config.save_strategy, SaveStrategy::All);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            Configuration::from_json_str("{ nope"),
            Err(ConfigurationError::Json(_))
        ));
    }

    #[test]
    fn strategies_parse_case_insensitively() {
        assert_eq!("count".parse::<SaveStrategy>().unwrap(), SaveStrategy::Count);
        assert_eq!("c_random".parse::<TieStrategy>().unwrap(), TieStrategy::Random);
        assert!("other".parse::<TieStrategy>().is_err());
    }
}
