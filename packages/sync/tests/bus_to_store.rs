//! A bus flushing into a real SQLite database.

use std::sync::{Arc, Barrier};
use std::thread;

use appvirt_core::{DatabaseAction, FileTableEntry, ResourceKind, TracingReportSink};
use appvirt_store::{Database, SqliteBackend};
use appvirt_sync::{LocalSink, SynchronizationBus};
use tempfile::TempDir;

fn entry(real: &str, virtual_identifier: &str) -> FileTableEntry {
    FileTableEntry::new(real, virtual_identifier, ResourceKind::File)
}

fn sqlite_sink(dir: &TempDir) -> Arc<LocalSink<FileTableEntry>> {
    let mut database =
        Database::<FileTableEntry>::new(SqliteBackend::open(dir.path().join("fs.db"))).unwrap();
    database.initialize().unwrap();
    Arc::new(LocalSink::new(database))
}

#[test]
fn flush_persists_net_effect() {
    let dir = TempDir::new().unwrap();
    let sink = sqlite_sink(&dir);
    let bus: SynchronizationBus<FileTableEntry> = SynchronizationBus::new("filesystem", sink.clone(), Arc::new(TracingReportSink));

    bus.enqueue(DatabaseAction::set(entry("c:\\a", "v1")));
    bus.enqueue(DatabaseAction::update(entry("c:\\a", "v2")));
    bus.enqueue(DatabaseAction::set(entry("c:\\b", "v3")));
    bus.enqueue(DatabaseAction::remove(entry("c:\\b", "")));
    bus.enqueue(DatabaseAction::set(entry("c:\\c", "v4")));
    bus.flush().unwrap();

    let stored: Vec<(String, String)> = sink
        .read_all()
        .unwrap()
        .into_iter()
        .map(|e| (e.real().to_string(), e.virtual_identifier().to_string()))
        .collect();
    assert_eq!(
        stored,
        vec![
            ("c:\\a".to_string(), "v2".to_string()),
            ("c:\\c".to_string(), "v4".to_string()),
        ]
    );
}

#[test]
fn concurrent_producers_lose_nothing() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let dir = TempDir::new().unwrap();
    let sink = sqlite_sink(&dir);
    let bus: SynchronizationBus<FileTableEntry> = SynchronizationBus::new("filesystem", sink.clone(), Arc::new(TracingReportSink));
    let barrier = Barrier::new(THREADS + 1);

    thread::scope(|s| {
        for t in 0..THREADS {
            let (bus, barrier) = (&bus, &barrier);
            s.spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    let real = format!("c:\\t{}\\f{}", t, i);
                    bus.enqueue(DatabaseAction::set(entry(&real, "v1")));
                    bus.enqueue(DatabaseAction::update(entry(&real, "v2")));
                }
            });
        }
        barrier.wait();
        // Flush concurrently with the producers.
        for _ in 0..5 {
            bus.flush().unwrap();
        }
    });
    bus.flush().unwrap();

    let stored = sink.read_all().unwrap();
    assert_eq!(stored.len(), THREADS * PER_THREAD);
    assert!(stored.iter().all(|e| e.virtual_identifier() == "v2"));
    assert_eq!(bus.pending(), 0);
}
