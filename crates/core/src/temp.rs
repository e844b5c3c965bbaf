//! Temporary layer tracker
//!
//! The engine's storage is a shared namespace with no garbage collection: a
//! pipeline that fails halfway must not leak its intermediate layers. Every
//! temporary name is registered here before the call that creates it runs,
//! so cleanup is complete even on partial failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{Engine, ModuleCall};

/// What kind of layer a temporary name refers to, for `g.remove type=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempKind {
    Raster,
    Vector,
    Region,
}

impl TempKind {
    fn element(self) -> &'static str {
        match self {
            TempKind::Raster => "raster",
            TempKind::Vector => "vector",
            TempKind::Region => "region",
        }
    }
}

struct Entry {
    name: String,
    kind: TempKind,
}

/// Ordered registry of ephemeral layer names.
#[derive(Default)]
pub struct TempTracker {
    entries: Mutex<Vec<Entry>>,
    cleaned: AtomicBool,
}

/// A unique layer name with the given prefix.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

impl TempTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name and hand it back, so registration can be inlined at the
    /// call site that creates the layer.
    pub fn register(&self, name: impl Into<String>, kind: TempKind) -> String {
        let name = name.into();
        self.entries.lock().unwrap().push(Entry {
            name: name.clone(),
            kind,
        });
        name
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every registered layer, most recently created first, since
    /// later artifacts may reference earlier ones. Individual deletions are
    /// best-effort; one stuck layer must not block the rest. Runs at most
    /// once.
    pub fn cleanup(&self, engine: &dyn Engine) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries = std::mem::take(&mut *self.entries.lock().unwrap());
        for entry in entries.iter().rev() {
            let call = ModuleCall::new("g.remove")
                .flag('f')
                .option("type", entry.kind.element())
                .option("name", &entry.name);
            match engine.run(&call) {
                Ok(()) => debug!(name = %entry.name, "removed temporary layer"),
                Err(e) => warn!(name = %entry.name, error = %e, "failed to remove temporary layer"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockSession;

    #[test]
    fn unique_names_carry_prefix_and_differ() {
        let a = unique_name("holes");
        let b = unique_name("holes");
        assert!(a.starts_with("holes_"));
        assert_ne!(a, b);
    }

    #[test]
    fn cleanup_removes_in_reverse_order() {
        let tracker = TempTracker::new();
        let session = MockSession::new();
        tracker.register("first", TempKind::Raster);
        tracker.register("second", TempKind::Vector);
        tracker.cleanup(&session);

        let log = tracker_log(&session);
        assert_eq!(
            log,
            vec![
                "g.remove type=vector name=second -f",
                "g.remove type=raster name=first -f",
            ]
        );
    }

    #[test]
    fn cleanup_runs_once() {
        let tracker = TempTracker::new();
        let session = MockSession::new();
        tracker.register("only", TempKind::Raster);
        tracker.cleanup(&session);
        tracker.cleanup(&session);
        assert_eq!(tracker_log(&session).len(), 1);
    }

    #[test]
    fn cleanup_survives_individual_failures() {
        let tracker = TempTracker::new();
        let session = MockSession::new();
        session.seed_layer("a");
        session.seed_layer("b");
        tracker.register("a", TempKind::Raster);
        tracker.register("b", TempKind::Raster);
        session.fail_at(1); // removal of "b" fails
        tracker.cleanup(&session);
        assert!(session.contains("b"));
        assert!(!session.contains("a"));
    }

    fn tracker_log(session: &MockSession) -> Vec<String> {
        session.log()
    }
}
