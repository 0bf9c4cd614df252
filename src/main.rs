//! `aegis-kernel` binary.
//!
//! Reads its settings from the `AEGIS_*` variables of [`Configuration::from_env`], plus:
//! - `AEGIS_WORLD`: path to the JSON world description (required)
//! - `AEGIS_CONFIG`: path to an `aegis_config.json` applied on top (optional)
//! - `AEGIS_REPLAY`: replay log path (default: `aegis.replay`)
//! - `AEGIS_AGENT_WORLD`: where to write the world file handed to agents (default:
//!   `agent_world.txt`), its path is sent in CONNECT_OK unless `AEGIS_WORLD_FILE_NAME` is set

use std::env;
use std::fs;

use aegis_kernel::prelude::*;
use anyhow::Context;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let result = run();
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

fn run() -> anyhow::Result<()> {
    let mut config = Configuration::from_env();
    if let Ok(path) = env::var("AEGIS_CONFIG") {
        let json = fs::read_to_string(&path)
            .with_context(|| format!("kernel error: reading configuration {path}"))?;
        config = config.with_json_str(&json)?;
    }

    let world_path = env::var("AEGIS_WORLD").context("kernel error: AEGIS_WORLD is not set")?;
    let world_json = fs::read_to_string(&world_path)
        .with_context(|| format!("kernel error: reading world {world_path}"))?;
    let description = WorldDescription::from_json_str(&world_json)?;
    let mut world = AegisWorld::build(&description, config.move_cost_enabled())?;

    let agent_world =
        env::var("AEGIS_AGENT_WORLD").unwrap_or_else(|_| "agent_world.txt".to_owned());
    fs::write(&agent_world, world.agent_world_info())
        .with_context(|| format!("kernel error: writing agent world {agent_world}"))?;
    if env::var("AEGIS_WORLD_FILE_NAME").is_err() {
        config = config.with_world_file_name(agent_world);
    }

    let replay_path = env::var("AEGIS_REPLAY").unwrap_or_else(|_| "aegis.replay".to_owned());
    let replay = ReplayFile::create(&replay_path, &world_json)?;

    let mut kernel = Kernel::new(config, world, replay);
    let addr = kernel.listen()?;
    info!(%addr, "waiting for agents");
    println!("AEGIS kernel listening on {addr}");

    let summary = kernel.run()?;
    println!(
        "Simulation ended after {} rounds ({:?})",
        summary.rounds_played, summary.end_reason
    );
    for group in &summary.groups {
        println!(
            "{} (GID {}): {} saved, {} alive, {} dead",
            group.name,
            group.gid,
            group.number_saved,
            group.number_saved_alive,
            group.number_saved_dead
        );
    }
    Ok(())
}
