//! Reporting: renders a notebook and derives the process exit code
//!
//! `report` executes a script and turns the notebook into display output plus
//! an exit code. The exit code is 0 only for a fully clean run: no failed
//! records, no out-of-band errors, no duplicate-completion flag, and no
//! incomplete assertions from an attached assertion library.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;

use crate::error::EngineError;
use crate::executor::{execute, ExecuteOptions};
use crate::model::Notebook;
use crate::script::Script;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Rendering target for [`report`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    JsonPretty,
}

impl FromStr for OutputFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" => Ok(OutputFormat::JsonPretty),
            other => Err(EngineError::UnknownFormat(other.to_string())),
        }
    }
}

/// Bridge to an assertion library, queried once after the run.
pub trait AssertionCounter: Send + Sync {
    /// Total assertions executed, when the library can report it.
    fn count(&self) -> Option<u64>;

    /// Source locations of assertions created but never executed.
    fn incomplete(&self) -> Vec<String>;
}

/// Per-file lint findings appended to the summary output.
#[derive(Clone, Debug)]
pub struct LintEntry {
    pub filename: String,
    pub errors: Vec<String>,
}

/// Bridge to an external linter, run once after the tests. `path` is the
/// configured lint root, when one was given.
pub trait LintRunner: Send + Sync {
    fn lint(&self, path: Option<&Path>) -> Result<Vec<LintEntry>>;
}

/// Options for one report pass.
pub struct ReportOptions {
    pub execute: ExecuteOptions,
    pub format: OutputFormat,
    pub colorize: bool,
    pub assertions: Option<Box<dyn AssertionCounter>>,
    pub lint: Option<Box<dyn LintRunner>>,
    pub linting_path: Option<PathBuf>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            execute: ExecuteOptions::default(),
            format: OutputFormat::Summary,
            colorize: false,
            assertions: None,
            lint: None,
            linting_path: None,
        }
    }
}

/// Execute a script and render the outcome. Returns the exit code and the
/// rendered output.
pub async fn report(script: &Script, options: &ReportOptions) -> Result<(i32, String)> {
    let notebook = execute(script, &options.execute).await?;

    let (assertion_count, incomplete) = match &options.assertions {
        Some(counter) => (counter.count(), counter.incomplete()),
        None => (None, Vec::new()),
    };

    let output = match options.format {
        OutputFormat::Json => serde_json::to_string(&notebook)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&notebook)?,
        OutputFormat::Summary => {
            let lint = match &options.lint {
                Some(runner) => runner.lint(options.linting_path.as_deref())?,
                None => Vec::new(),
            };
            render_summary(
                &notebook,
                assertion_count,
                &incomplete,
                &lint,
                options.colorize,
            )
        }
    };

    let clean = notebook.is_clean() && incomplete.is_empty();
    Ok((i32::from(!clean), output))
}

fn paint(text: &str, color: &str, enabled: bool) -> String {
    if enabled {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

fn render_summary(
    notebook: &Notebook,
    assertion_count: Option<u64>,
    incomplete: &[String],
    lint: &[LintEntry],
    colorize: bool,
) -> String {
    let mut out = String::new();

    for record in &notebook.tests {
        if let Some(err) = &record.err {
            let line = format!("  {} {}: {err}", record.state.symbol(), record.path);
            let _ = writeln!(out, "{}", paint(&line, RED, colorize));
        }
    }

    let total = notebook.tests.len();
    if notebook.failures > 0 {
        let line = format!("{} of {} tests failed", notebook.failures, total);
        let _ = writeln!(out, "{}", paint(&line, RED, colorize));
    } else {
        let line = format!("{total} tests complete");
        let _ = writeln!(out, "{}", paint(&line, GREEN, colorize));
    }
    if notebook.skipped() > 0 {
        let line = format!("{} tests skipped", notebook.skipped());
        let _ = writeln!(out, "{}", paint(&line, YELLOW, colorize));
    }
    let _ = writeln!(out, "Test duration: {}ms", notebook.duration_ms);

    if let Some(count) = assertion_count {
        let _ = writeln!(out, "Assertions count: {count}");
    }
    for location in incomplete {
        let line = format!("Incomplete assertion at {location}");
        let _ = writeln!(out, "{}", paint(&line, RED, colorize));
    }

    if !notebook.errors.is_empty() {
        let _ = writeln!(out, "Errors:");
        for error in &notebook.errors {
            let _ = writeln!(out, "  {}", paint(error, RED, colorize));
        }
    }

    let flagged: Vec<&LintEntry> = lint.iter().filter(|e| !e.errors.is_empty()).collect();
    if !flagged.is_empty() {
        let _ = writeln!(out, "Lint:");
        for entry in flagged {
            let _ = writeln!(out, "  {}:", entry.filename);
            for error in &entry.errors {
                let _ = writeln!(out, "    {}", paint(error, YELLOW, colorize));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Environment;
    use crate::script::{Script, ScriptOptions};

    fn quiet() -> Script {
        Script::with_options(ScriptOptions { schedule: false })
    }

    fn options() -> ReportOptions {
        ReportOptions {
            execute: ExecuteOptions {
                environment: Environment::Inherit,
                ..ExecuteOptions::default()
            },
            ..ReportOptions::default()
        }
    }

    #[tokio::test]
    async fn clean_run_exits_zero() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.pass());
            e.test("two", |c| c.pass());
        });

        let (code, output) = report(&script, &options()).await.unwrap();
        assert_eq!(code, 0);
        assert!(output.contains("2 tests complete"));
        assert!(output.contains("Test duration:"));
    }

    #[tokio::test]
    async fn failures_exit_one_with_detail_lines() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.pass());
            e.test("two", |c| c.fail("carry lost"));
        });

        let (code, output) = report(&script, &options()).await.unwrap();
        assert_eq!(code, 1);
        assert!(output.contains("1 of 2 tests failed"));
        assert!(output.contains("test.two: carry lost"));
    }

    #[tokio::test]
    async fn double_completion_exits_one() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("1", |c| {
                c.pass();
                c.pass();
            });
        });

        let (code, output) = report(&script, &options()).await.unwrap();
        assert_eq!(code, 1);
        assert!(output.contains("Multiple callbacks or thrown errors received"));
    }

    struct FixedCounter {
        count: Option<u64>,
        incomplete: Vec<String>,
    }

    impl AssertionCounter for FixedCounter {
        fn count(&self) -> Option<u64> {
            self.count
        }

        fn incomplete(&self) -> Vec<String> {
            self.incomplete.clone()
        }
    }

    #[tokio::test]
    async fn assertion_count_is_reported() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.pass());
        });

        let mut options = options();
        options.assertions = Some(Box::new(FixedCounter {
            count: Some(12),
            incomplete: Vec::new(),
        }));
        let (code, output) = report(&script, &options).await.unwrap();
        assert_eq!(code, 0);
        assert!(output.contains("Assertions count: 12"));
    }

    #[tokio::test]
    async fn incomplete_assertions_fail_the_run() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.pass());
        });

        let mut options = options();
        options.assertions = Some(Box::new(FixedCounter {
            count: Some(3),
            incomplete: vec!["checks.rs:42".to_string()],
        }));
        let (code, output) = report(&script, &options).await.unwrap();
        assert_eq!(code, 1);
        assert!(output.contains("Incomplete assertion at checks.rs:42"));
    }

    #[tokio::test]
    async fn incompatible_counter_reports_nothing() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.pass());
        });

        let mut options = options();
        options.assertions = Some(Box::new(FixedCounter {
            count: None,
            incomplete: Vec::new(),
        }));
        let (code, output) = report(&script, &options).await.unwrap();
        assert_eq!(code, 0);
        assert!(!output.contains("Assertions count"));
    }

    struct FixedLinter;

    impl LintRunner for FixedLinter {
        fn lint(&self, path: Option<&Path>) -> Result<Vec<LintEntry>> {
            let root = path.map(|p| p.display().to_string()).unwrap_or_default();
            Ok(vec![
                LintEntry {
                    filename: format!("{root}/clean.rs"),
                    errors: Vec::new(),
                },
                LintEntry {
                    filename: format!("{root}/messy.rs"),
                    errors: vec!["unused variable `x`".to_string()],
                },
            ])
        }
    }

    #[tokio::test]
    async fn lint_findings_are_appended() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.pass());
        });

        let mut options = options();
        options.lint = Some(Box::new(FixedLinter));
        options.linting_path = Some(PathBuf::from("src"));
        let (code, output) = report(&script, &options).await.unwrap();
        assert_eq!(code, 0);
        assert!(output.contains("src/messy.rs"));
        assert!(output.contains("unused variable `x`"));
        assert!(!output.contains("clean.rs"));
    }

    #[tokio::test]
    async fn json_output_round_trips() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.pass());
            e.test("two", |c| c.fail("boom"));
        });

        let mut options = options();
        options.format = OutputFormat::Json;
        let (code, output) = report(&script, &options).await.unwrap();
        assert_eq!(code, 1);
        let notebook: Notebook = serde_json::from_str(&output).unwrap();
        assert_eq!(notebook.tests.len(), 2);
        assert_eq!(notebook.failures, 1);
    }

    #[test]
    fn format_parses() {
        assert_eq!(
            "summary".parse::<OutputFormat>().unwrap(),
            OutputFormat::Summary
        );
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "json-pretty".parse::<OutputFormat>().unwrap(),
            OutputFormat::JsonPretty
        );
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[tokio::test]
    async fn colorized_summary_wraps_failures() {
        let mut script = quiet();
        script.experiment("test", |e| {
            e.test("one", |c| c.fail("boom"));
        });

        let mut options = options();
        options.colorize = true;
        let (_, output) = report(&script, &options).await.unwrap();
        assert!(output.contains("\x1b[31m"));
    }
}
