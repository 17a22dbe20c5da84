//! The snapshot cell: one writer, many readers, no locks.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::snapshot::Snapshot;

/// A single-writer/multi-reader handle to the current routing snapshot.
///
/// Readers take an `Arc` once at request entry and keep it for the whole
/// request, so a poller publishing mid-request can never show them mixed
/// eras. The old snapshot is dropped when its last reader lets go.
#[derive(Debug)]
pub struct SnapshotCell {
    current: ArcSwap<Snapshot>,
}

impl SnapshotCell {
    /// Create a cell holding the given snapshot.
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self {
            current: ArcSwap::new(snapshot),
        }
    }

    /// Get the current snapshot. Lock-free; call once per request and hold
    /// the returned handle for the request's lifetime.
    pub fn get(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Atomically replace the current snapshot. Never blocks readers.
    pub fn set(&self, snapshot: Arc<Snapshot>) {
        self.current.store(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot_with_domain(domain: &str) -> Arc<Snapshot> {
        let mut snapshot = Snapshot {
            cdn_domain: domain.to_string(),
            ..Snapshot::default()
        };
        // A marker derived from the domain, so readers can check that the
        // fields they see belong to the same era.
        snapshot
            .http_second_matches
            .insert(format!("edge.{domain}"), domain.to_string());
        Arc::new(snapshot)
    }

    #[test]
    fn test_set_then_get() {
        let cell = SnapshotCell::new(snapshot_with_domain("a.test"));
        assert_eq!(cell.get().cdn_domain, "a.test");

        cell.set(snapshot_with_domain("b.test"));
        assert_eq!(cell.get().cdn_domain, "b.test");
    }

    #[test]
    fn test_reader_keeps_its_snapshot_across_a_swap() {
        let cell = SnapshotCell::new(snapshot_with_domain("a.test"));
        let held = cell.get();
        cell.set(snapshot_with_domain("b.test"));
        assert_eq!(held.cdn_domain, "a.test");
        assert_eq!(cell.get().cdn_domain, "b.test");
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_eras() {
        let cell = Arc::new(SnapshotCell::new(snapshot_with_domain("a.test")));

        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 0..2_000 {
                    let domain = if i % 2 == 0 { "a.test" } else { "b.test" };
                    cell.set(snapshot_with_domain(domain));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = cell.get();
                        let domain = snapshot.cdn_domain.clone();
                        // Every field must come from the same era as the
                        // domain; a torn snapshot would fail here.
                        assert_eq!(
                            snapshot.http_second_matches.get(&format!("edge.{domain}")),
                            Some(&domain)
                        );
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
