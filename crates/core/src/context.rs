//! Per-invocation orchestration context
//!
//! One `Context` lives for the duration of one tool invocation. It owns the
//! engine session and the temporary-layer tracker, and guarantees cleanup on
//! every exit path: the tracker's best-effort deletions run when the context
//! is dropped, whether the pipeline finished or bailed out with `?`.

use std::fmt;

use crate::engine::{mapcalc, Engine, ModuleCall};
use crate::error::Result;
use crate::temp::{unique_name, TempKind, TempTracker};

pub struct Context {
    engine: Box<dyn Engine>,
    tracker: TempTracker,
}

impl Context {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine,
            tracker: TempTracker::new(),
        }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn tracker(&self) -> &TempTracker {
        &self.tracker
    }

    pub fn run(&self, call: &ModuleCall) -> Result<()> {
        self.engine.run(call)
    }

    pub fn read(&self, call: &ModuleCall) -> Result<String> {
        self.engine.read(call)
    }

    pub fn write(&self, call: &ModuleCall, stdin: &str) -> Result<()> {
        self.engine.write(call, stdin)
    }

    /// Evaluate a map-algebra expression.
    pub fn mapcalc(&self, expression: impl fmt::Display) -> Result<()> {
        self.run(&mapcalc(expression))
    }

    /// Generate and register a temporary raster name.
    pub fn temp_raster(&self, prefix: &str) -> String {
        self.tracker.register(unique_name(prefix), TempKind::Raster)
    }

    /// Generate and register a temporary vector name.
    pub fn temp_vector(&self, prefix: &str) -> String {
        self.tracker.register(unique_name(prefix), TempKind::Vector)
    }

    /// Register an existing name for cleanup and hand it back.
    pub fn register(&self, name: impl Into<String>, kind: TempKind) -> String {
        self.tracker.register(name, kind)
    }

    /// Whether a layer of the given type exists in an accessible mapset.
    pub fn layer_exists(&self, kind: &str, name: &str) -> Result<bool> {
        let output = self.read(
            &ModuleCall::new("g.list")
                .option("type", kind)
                .option("pattern", name),
        )?;
        Ok(output.lines().any(|line| !line.trim().is_empty()))
    }

    pub fn raster_exists(&self, name: &str) -> Result<bool> {
        self.layer_exists("raster", name)
    }

    pub fn vector_exists(&self, name: &str) -> Result<bool> {
        self.layer_exists("vector", name)
    }

    /// Whether the engine's singleton mask layer is active.
    pub fn mask_present(&self) -> Result<bool> {
        self.raster_exists("MASK")
    }

    /// Run the tracker's cleanup now instead of at drop time.
    pub fn cleanup(&self) {
        self.tracker.cleanup(self.engine.as_ref());
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::mock::MockSession;
    use std::sync::Arc;

    pub(crate) fn shared_context() -> (Context, Arc<MockSession>) {
        let session = Arc::new(MockSession::new());
        (Context::new(Box::new(session.clone())), session)
    }

    #[test]
    fn drop_cleans_registered_layers() {
        let (ctx, session) = shared_context();
        let name = ctx.temp_raster("holes");
        ctx.mapcalc(format!("{name} = 1")).unwrap();
        assert!(session.contains(&name));
        drop(ctx);
        assert!(!session.contains(&name));
    }

    #[test]
    fn layer_exists_consults_the_engine() {
        let (ctx, session) = shared_context();
        assert!(!ctx.raster_exists("dem").unwrap());
        session.seed_layer("dem");
        assert!(ctx.raster_exists("dem").unwrap());
    }
}
