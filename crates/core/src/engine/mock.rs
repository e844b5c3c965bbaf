//! Scripted engine session for tests
//!
//! Replays canned stdout per module, records every call in order, and keeps
//! a simulated layer namespace so tests can assert what a pipeline created
//! and what its cleanup removed. Calls that name an `output` option create a
//! layer; `g.remove` deletes, `g.rename` moves, `g.copy` duplicates.
//! A failure can be injected at the Nth call to exercise error paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::engine::{Engine, ModuleCall};
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    log: Vec<String>,
    responses: HashMap<String, VecDeque<String>>,
    namespace: HashSet<String>,
    calls: usize,
    fail_at: Option<usize>,
}

/// A scripted [`Engine`] implementation.
#[derive(Default)]
pub struct MockSession {
    inner: Mutex<Inner>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stdout response for the next `read` of the given module.
    pub fn respond(&self, module: &str, stdout: &str) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .entry(module.to_string())
            .or_default()
            .push_back(stdout.to_string());
    }

    /// Pre-create a layer in the simulated namespace.
    pub fn seed_layer(&self, name: &str) {
        self.inner.lock().unwrap().namespace.insert(name.to_string());
    }

    /// Make the Nth call (1-based) fail with a module error.
    pub fn fail_at(&self, call_number: usize) {
        self.inner.lock().unwrap().fail_at = Some(call_number);
    }

    /// Rendered command lines, in execution order.
    pub fn log(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    /// Whether a layer currently exists in the simulated namespace.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().unwrap().namespace.contains(name)
    }

    /// All layer names currently in the simulated namespace, sorted.
    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .unwrap()
            .namespace
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn record(&self, call: &ModuleCall) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls += 1;
        inner.log.push(call.to_string());
        if inner.fail_at == Some(inner.calls) {
            return Err(Error::Module {
                command: call.to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        apply_namespace_effects(&mut inner.namespace, call);
        Ok(())
    }
}

fn apply_namespace_effects(namespace: &mut HashSet<String>, call: &ModuleCall) {
    match call.module() {
        "g.remove" => {
            if let Some(names) = call.get("name") {
                for name in names.split(',') {
                    namespace.remove(name.trim());
                }
            }
        }
        "g.rename" | "g.copy" => {
            for key in ["raster", "vector", "vect", "region"] {
                if let Some(pair) = call.get(key) {
                    if let Some((old, new)) = pair.split_once(',') {
                        if call.module() == "g.rename" {
                            namespace.remove(old.trim());
                        }
                        namespace.insert(new.trim().to_string());
                    }
                }
            }
        }
        "r.mask" => {
            namespace.insert("MASK".to_string());
        }
        _ => {
            if let Some(output) = call.get("output") {
                namespace.insert(output.to_string());
            }
            // g.region save=name persists a named region
            if call.module() == "g.region" {
                if let Some(saved) = call.get("save") {
                    namespace.insert(saved.to_string());
                }
            }
        }
    }
}

impl Engine for MockSession {
    fn run(&self, call: &ModuleCall) -> Result<()> {
        self.record(call)
    }

    fn read(&self, call: &ModuleCall) -> Result<String> {
        self.record(call)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(response) = inner
            .responses
            .get_mut(call.module())
            .and_then(VecDeque::pop_front)
        {
            return Ok(response);
        }
        // Unscripted g.list queries answer from the simulated namespace so
        // existence checks behave naturally in tests.
        if call.module() == "g.list" {
            if let Some(pattern) = call.get("pattern") {
                if inner.namespace.contains(pattern) {
                    return Ok(format!("{pattern}\n"));
                }
            }
        }
        Ok(String::new())
    }

    fn write(&self, call: &ModuleCall, _stdin: &str) -> Result<()> {
        self.record(call)
    }
}

/// Shared handles forward to the same scripted session, so a test can keep
/// inspecting the log and namespace after handing the engine to a context.
impl Engine for std::sync::Arc<MockSession> {
    fn run(&self, call: &ModuleCall) -> Result<()> {
        self.as_ref().run(call)
    }

    fn read(&self, call: &ModuleCall) -> Result<String> {
        self.as_ref().read(call)
    }

    fn write(&self, call: &ModuleCall, stdin: &str) -> Result<()> {
        self.as_ref().write(call, stdin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_outputs_and_removals() {
        let session = MockSession::new();
        session
            .run(&ModuleCall::new("r.clump").option("input", "a").option("output", "b"))
            .unwrap();
        assert!(session.contains("b"));
        session
            .run(&ModuleCall::new("g.remove").option("type", "raster").option("name", "b"))
            .unwrap();
        assert!(!session.contains("b"));
    }

    #[test]
    fn rename_moves_copy_duplicates() {
        let session = MockSession::new();
        session.seed_layer("MASK");
        session
            .run(&ModuleCall::new("g.rename").option("raster", "MASK,saved"))
            .unwrap();
        assert!(!session.contains("MASK"));
        assert!(session.contains("saved"));
        session
            .run(&ModuleCall::new("g.copy").option("vect", "saved,other"))
            .unwrap();
        assert!(session.contains("saved"));
        assert!(session.contains("other"));
    }

    #[test]
    fn scripted_reads_pop_in_order() {
        let session = MockSession::new();
        session.respond("r.stats", "1;10");
        session.respond("r.stats", "2;20");
        let call = ModuleCall::new("r.stats").option("input", "x");
        assert_eq!(session.read(&call).unwrap(), "1;10");
        assert_eq!(session.read(&call).unwrap(), "2;20");
        assert_eq!(session.read(&call).unwrap(), "");
    }

    #[test]
    fn injected_failure_fires_on_exact_call() {
        let session = MockSession::new();
        session.fail_at(2);
        let call = ModuleCall::new("r.mapcalc").option("expression", "a = 1");
        assert!(session.run(&call).is_ok());
        assert!(session.run(&call).is_err());
        assert!(session.run(&call).is_ok());
    }
}
