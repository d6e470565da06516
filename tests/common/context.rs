//! Fluent wrapper around `Simulator` for integration tests: load source from
//! a string, run/step, and assert on register/memory state without every
//! test re-deriving the temp-file dance in `values.rs`.

use rvsim::simulator::{RunStatus, Simulator, StepOutcome};

use super::values::write_source;

pub struct TestContext {
    pub sim: Simulator,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        TestContext { sim: Simulator::new() }
    }

    /// Writes `source` to a temp file and loads it, panicking on assembly
    /// failure (most tests want a loaded program, not the failure path).
    pub fn load(&mut self, source: &str) -> &mut Self {
        let path = write_source(source);
        self.sim.load(&path).unwrap_or_else(|e| panic!("load failed: {e}"));
        self
    }

    pub fn run(&mut self) -> RunStatus {
        self.sim.run().expect("run should succeed on a loaded program")
    }

    pub fn step(&mut self) -> StepOutcome {
        self.sim.step().expect("step should succeed on a loaded program")
    }

    pub fn reg(&self, index: u8) -> i64 {
        self.sim.registers()[index as usize]
    }
}
