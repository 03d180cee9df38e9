//! benchtop: a declarative test execution engine
//!
//! Tests are declared as a tree of experiments, tests, and hooks on a
//! [`Script`], compiled into a frozen tree, and executed by a cooperative
//! scheduler. Sibling nodes resolved as parallel run concurrently in batches;
//! everything else is strictly sequential. Every test body and hook runs
//! under its own isolation boundary with a deadline, so a duplicate callback
//! or a late signal from a shared fixture is detected and attributed to
//! whatever was running when it arrived instead of corrupting an unrelated
//! result.
//!
//! ```no_run
//! use benchtop::{execute, ExecuteOptions, Script};
//!
//! # async fn demo() -> Result<(), benchtop::EngineError> {
//! let mut script = Script::new();
//! script.experiment("math", |e| {
//!     e.test("adds", |c| {
//!         if 1 + 1 == 2 {
//!             c.pass();
//!         } else {
//!             c.fail("arithmetic is broken");
//!         }
//!     });
//! });
//!
//! let notebook = execute(&script, &ExecuteOptions::default()).await?;
//! assert!(notebook.is_clean());
//! # Ok(())
//! # }
//! ```

mod error;
mod executor;
mod filter;
mod model;
mod report;
mod script;
mod util;

pub use error::{EngineError, ScriptError};
pub use executor::{
    execute, execute_observed, Completion, Environment, ExecuteOptions, Observer, ENV_VAR,
};
pub use model::{Notebook, TestRecord, TestState, Tree, DEFAULT_TIMEOUT};
pub use report::{
    report, AssertionCounter, LintEntry, LintRunner, OutputFormat, ReportOptions,
};
pub use script::{scheduled, Options, Scope, Script, ScriptOptions};
pub use util::{init_logger, LogLevel};
