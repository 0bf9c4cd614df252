//! Write-only outputs of a run: the textual replay log and the per-round world snapshots.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::json;
use time::OffsetDateTime;
use tracing::warn;

use crate::world::snapshot::WorldSnapshot;

/// Where the kernel reports a run. Implementations must not fail the round: they log and drop.
pub trait ReplaySink {
    /// Appends one line to the replay log. `line` carries its own terminators.
    fn write_line(&mut self, line: &str);
    /// Records the world after `round` (0 is the initial world).
    fn snapshot(&mut self, round: u32, snapshot: &WorldSnapshot);
    /// The run is over, nothing else follows.
    fn simulation_complete(&mut self);
}

/// Replay log and snapshot stream on disk.
///
/// Snapshots go to a sibling file named after the replay file with `.snapshots.jsonl` appended.
#[derive(Debug)]
pub struct ReplayFile {
    log: BufWriter<File>,
    snapshots: BufWriter<File>,
    path: PathBuf,
}

impl ReplayFile {
    /// Creates both files and writes the replay header: the length of the world description,
    /// the description itself and the run date.
    pub fn create(path: impl AsRef<Path>, world_json: &str) -> anyhow::Result<ReplayFile> {
        let path = path.as_ref().to_path_buf();
        let mut snapshots_path = path.clone().into_os_string();
        snapshots_path.push(".snapshots.jsonl");

        let log = File::create(&path)
            .with_context(|| format!("kernel error: creating replay file {}", path.display()))?;
        let snapshots = File::create(&snapshots_path).with_context(|| {
            format!(
                "kernel error: creating snapshot file {}",
                PathBuf::from(&snapshots_path).display()
            )
        })?;
        let mut replay = ReplayFile {
            log: BufWriter::new(log),
            snapshots: BufWriter::new(snapshots),
            path,
        };

        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        write!(
            replay.log,
            "{}\n{}\nSystem Run date: {}\n",
            world_json.len(),
            world_json,
            now
        )
        .and_then(|_| replay.log.flush())
        .context("kernel error: writing replay header")?;
        Ok(replay)
    }

    /// Path of the replay log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: serde_json::Value) {
        let result = serde_json::to_writer(&mut self.snapshots, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.snapshots.write_all(b"\n"))
            .and_then(|_| self.snapshots.flush());
        if let Err(e) = result {
            warn!(%e, path = %self.path.display(), "could not write snapshot");
        }
    }
}

impl ReplaySink for ReplayFile {
    fn write_line(&mut self, line: &str) {
        if let Err(e) = self
            .log
            .write_all(line.as_bytes())
            .and_then(|_| self.log.flush())
        {
            warn!(%e, path = %self.path.display(), "could not write replay line");
        }
    }

    fn snapshot(&mut self, round: u32, snapshot: &WorldSnapshot) {
        self.write_event(json!({
            "event_type": "Round",
            "round": round,
            "after_world": snapshot,
        }));
    }

    fn simulation_complete(&mut self) {
        self.write_event(json!({ "event_type": "SimulationComplete" }));
    }
}

/// Keeps everything in memory. Used by tests and embedding hosts.
#[derive(Debug, Default, Clone)]
pub struct MemoryReplay {
    /// Every replay line, in order.
    pub lines: Vec<String>,
    /// `(round, snapshot)` pairs, in order.
    pub snapshots: Vec<(u32, WorldSnapshot)>,
    /// Set once the run is over.
    pub complete: bool,
}

impl MemoryReplay {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The replay log as one string.
    pub fn text(&self) -> String {
        self.lines.concat()
    }
}

impl ReplaySink for MemoryReplay {
    fn write_line(&mut self, line: &str) {
        self.lines.push(line.to_owned());
    }

    fn snapshot(&mut self, round: u32, snapshot: &WorldSnapshot) {
        self.snapshots.push((round, snapshot.clone()));
    }

    fn simulation_complete(&mut self) {
        self.complete = true;
    }
}

#[cfg(test)]
mod replay_tests {
    use std::fs;

    use super::*;
    use crate::world::description::WorldDescription;
    use crate::world::AegisWorld;

    #[test]
    fn file_sink_writes_header_lines_and_snapshots() {
        let dir = std::env::temp_dir().join(format!("aegis_replay_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("run.replay");
        let world_json = r#"{"settings":{}}"#;

        let world = AegisWorld::build(&WorldDescription::empty(3, 3, 1, 10), true).unwrap();
        {
            let mut sink = ReplayFile::create(&path, world_json).unwrap();
            sink.write_line("RS;1;\n");
            sink.snapshot(1, &world.snapshot());
            sink.simulation_complete();
        }

        let log = fs::read_to_string(&path).unwrap();
        let mut lines = log.lines();
        assert_eq!(lines.next(), Some("15"));
        assert_eq!(lines.next(), Some(world_json));
        assert!(lines.next().unwrap().starts_with("System Run date: "));
        assert_eq!(lines.next(), Some("RS;1;"));

        let snapshots = fs::read_to_string(dir.join("run.replay.snapshots.jsonl")).unwrap();
        let events: Vec<serde_json::Value> = snapshots
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event_type"], "Round");
        assert_eq!(events[0]["round"], 1);
        assert_eq!(events[0]["after_world"]["grid_data"].as_array().unwrap().len(), 9);
        assert_eq!(events[1]["event_type"], "SimulationComplete");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn memory_sink_keeps_order() {
        let mut sink = MemoryReplay::new();
        sink.write_line("RS;1;\n");
        sink.write_line("RE;\n");
        sink.simulation_complete();
        assert_eq!(sink.text(), "RS;1;\nRE;\n");
        assert!(sink.complete);
    }
}
