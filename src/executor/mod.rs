//! Execution engine: compiles a script, applies the filter, and drives the
//! scheduler over the frozen tree
//!
//! `execute` is the single entry point. It pins the ambient environment
//! variable for the duration of the run, captures the engine clock before any
//! user code executes, and aggregates the scheduler's records into a
//! [`Notebook`].

pub(crate) mod boundary;
mod scheduler;

use std::collections::HashSet;

use tracing::info;

use crate::error::EngineError;
use crate::filter::Filter;
use crate::model::{Notebook, TestRecord};
use crate::script::Script;
use crate::util::clock::{clock, Timer};

pub use boundary::Completion;
use boundary::RunContext;
use scheduler::Run;

/// Environment variable pinned for the duration of a run.
pub const ENV_VAR: &str = "BENCHTOP_ENV";

/// What to do with [`ENV_VAR`] while a run is in flight.
///
/// The previous value is restored when the run finishes, on every exit path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    /// Pin the conventional value `"test"`.
    #[default]
    Default,
    /// Pin an explicit value.
    Set(String),
    /// Leave the ambient value untouched.
    Inherit,
}

/// Options for one execution pass over a script.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    /// Run-level default for nodes that never resolved a `parallel` flag.
    pub parallel: bool,
    /// Restrict the run to these test ids.
    pub ids: Option<HashSet<u32>>,
    /// Restrict the run to tests whose dotted path matches this pattern.
    pub grep: Option<String>,
    /// Replace admitted test bodies with no-ops; hooks still run.
    pub dry: bool,
    /// Collect stray signals that arrive with no active boundary instead of
    /// dropping them.
    pub debug: bool,
    pub environment: Environment,
}

/// Live progress notifications, one callback per test lifecycle edge.
pub trait Observer: Send + Sync {
    fn test_started(&self, _record: &TestRecord) {}
    fn test_finished(&self, record: &TestRecord);
}

/// Restores [`ENV_VAR`] to its pre-run value on drop.
struct EnvGuard {
    previous: Option<Option<String>>,
}

impl EnvGuard {
    fn apply(environment: &Environment) -> Self {
        let value = match environment {
            Environment::Inherit => return Self { previous: None },
            Environment::Default => "test",
            Environment::Set(value) => value.as_str(),
        };
        let previous = std::env::var(ENV_VAR).ok();
        std::env::set_var(ENV_VAR, value);
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            match previous {
                Some(value) => std::env::set_var(ENV_VAR, value),
                None => std::env::remove_var(ENV_VAR),
            }
        }
    }
}

/// Compile and run a script, returning the aggregated notebook.
pub async fn execute(script: &Script, options: &ExecuteOptions) -> Result<Notebook, EngineError> {
    execute_observed(script, options, None).await
}

/// Like [`execute`], with per-test progress callbacks.
pub async fn execute_observed(
    script: &Script,
    options: &ExecuteOptions,
    observer: Option<&dyn Observer>,
) -> Result<Notebook, EngineError> {
    let _env = EnvGuard::apply(&options.environment);

    let tree = script.compile()?;
    let filter = Filter::from_options(options)?;

    // Capture ambient timers before any user code can replace them.
    let _ = clock();
    let timer = Timer::start();

    let ctx = RunContext::new(options.debug);
    let run = Run::new(ctx.clone(), &filter, options.parallel, observer);
    let records = run.execute(&tree.root).await;

    let notebook = Notebook::new(records, ctx.take_errors(), ctx.is_fatal(), timer.elapsed_ms());
    info!(
        tests = notebook.tests.len(),
        failures = notebook.failures,
        duration_ms = notebook.duration_ms,
        "run complete"
    );
    Ok(notebook)
}
