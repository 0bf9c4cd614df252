use std::fs;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use aegis_kernel::logger::init_logger;
use aegis_kernel::prelude::*;
use aegis_kernel::protocol::AegisCommand;
use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    Layer, Registry,
};

use common::{start_kernel, survivor, test_config, TestAgent};

mod common;

struct WarnOnlyFilter;
impl<S> Filter<S> for WarnOnlyFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::WARN
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A subscriber that keeps warnings and errors in memory.
fn warning_capture() -> (Captured, impl tracing::Subscriber + Send + Sync) {
    let captured = Captured::default();
    let writer = captured.clone();
    let reg = Registry::default().with(
        fmt::layer()
            .without_time()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .with_filter(WarnOnlyFilter),
    );
    (captured, reg)
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

#[test]
fn warnings_reach_a_scoped_subscriber() {
    let (captured, reg) = warning_capture();

    let config = test_config(1, 1).with_idle_timeout(Duration::from_millis(100));
    let world = AegisWorld::build(&WorldDescription::empty(2, 2, 1, 10), true).unwrap();
    tracing::subscriber::with_default(reg, || {
        let mut kernel = Kernel::new(config, world, MemoryReplay::new());
        kernel.run().unwrap();
    });

    let text = captured.text();
    assert!(text.contains("idle for too long"));
    assert!(!text.contains("kernel shut down"));
}

#[test]
fn crashed_agent_gets_no_death_card() {
    let (captured, reg) = warning_capture();

    let description = WorldDescription::empty(4, 4, 3, 100)
        .with_spawn(Location::new(1, 1), None)
        .with_stack(Location::new(3, 3), 1, vec![survivor(50)]);
    let world = AegisWorld::build(&description, true).unwrap();
    let mut kernel = Kernel::new(test_config(2, 1), world, MemoryReplay::new());
    let addr = kernel.listen().unwrap();

    // the kernel logs on this thread, so the agents play on another one
    let agents = thread::spawn(move || {
        let mut x = TestAgent::connect(addr, "alpha");
        let mut y = TestAgent::connect(addr, "beta");
        x.start_turn();
        x.crash();
        y.play(None);
        assert_eq!(y.receive(), AegisCommand::Disconnect);
    });
    let summary = tracing::subscriber::with_default(reg, || kernel.run().unwrap());
    agents.join().unwrap();

    assert_eq!(summary.rounds_played, 1);
    assert!(kernel.replay().text().contains("Dead_Agents; { (1, 1), };\n"));
    let text = captured.text();
    assert!(text.contains("agent crashed during its turn"));
    assert!(!text.contains("send failed"));
}

#[test]
fn file_logger_records_the_run() {
    let dir = std::env::temp_dir().join(format!("aegis_logging_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("kernel_log.txt");

    let written = init_logger(Some(&path)).unwrap();
    assert_eq!(written, path);
    // a second global subscriber is refused instead of panicking
    assert!(init_logger(Some(&dir.join("other.txt"))).is_err());

    // a kernel asking for its own log file keeps writing to the installed one
    let config = test_config(1, 1)
        .with_idle_timeout(Duration::from_millis(100))
        .with_log(true);
    let (_, kernel) = start_kernel(config, &WorldDescription::empty(2, 2, 1, 10));
    let (_, summary) = kernel.join().unwrap();
    assert_eq!(summary.unwrap().end_reason, EndReason::IdleTimeout);
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

    let log = fs::read_to_string(&path).unwrap();
    assert!(log.contains("keeping the current subscriber"));
    assert!(log.contains("idle for too long"));
    assert!(log.contains("kernel shut down"));

    fs::remove_dir_all(&dir).unwrap();
}
