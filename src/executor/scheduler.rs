//! Core scheduler: walks the tree, sequences hooks, batches siblings, and
//! drives every test to a finalized record
//!
//! Siblings are scanned left to right; consecutive siblings whose resolved
//! `parallel` flag is true form one batch launched concurrently through
//! `join_all`, while a serial sibling forms a singleton batch. Batches run
//! strictly in order: one fully completes before the next starts, with an
//! engine yield in between. Hook ordering is fully deterministic: `before`
//! and `after` wrap an experiment's children, `before_each` chains run from
//! the outermost ancestor in, `after_each` chains from the innermost out,
//! declaration order preserved within each level.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use crate::executor::boundary::{Boundary, Completion, RunContext, Verdict};
use crate::executor::Observer;
use crate::filter::Filter;
use crate::model::{Experiment, Node, Test, TestFn, TestRecord, TestState};
use crate::util::clock::{clock, Timer};

/// Outcome of one body or hook invocation: the boundary's verdict plus any
/// stray failure attributed to it after finalization.
struct Unit {
    verdict: Verdict,
    stray: Option<String>,
}

/// One execution pass over a frozen tree.
pub(crate) struct Run<'a> {
    ctx: Arc<RunContext>,
    filter: &'a Filter,
    default_parallel: bool,
    observer: Option<&'a dyn Observer>,
    records: Mutex<Vec<TestRecord>>,
}

impl<'a> Run<'a> {
    pub fn new(
        ctx: Arc<RunContext>,
        filter: &'a Filter,
        default_parallel: bool,
        observer: Option<&'a dyn Observer>,
    ) -> Self {
        Self {
            ctx,
            filter,
            default_parallel,
            observer,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Execute the whole tree and return the records in finalization order.
    pub async fn execute(self, root: &Experiment) -> Vec<TestRecord> {
        if self.filter.admits_any(root) {
            self.run_experiment(root, Vec::new()).await;
        }
        self.records.into_inner().unwrap()
    }

    fn run_experiment<'s>(
        &'s self,
        exp: &'s Experiment,
        lineage: Vec<&'s Experiment>,
    ) -> BoxFuture<'s, ()> {
        Box::pin(async move {
            // A skip-resolved experiment runs none of its own hooks; its
            // descendants are still visited so they are recorded.
            let run_hooks = !exp.options.skip;

            if run_hooks {
                for hook in &exp.before {
                    let unit = self
                        .run_unit(format!("Before {}", exp.title()), hook, exp.options.timeout)
                        .await;
                    if let Some(stray) = unit.stray {
                        self.ctx.push_error(stray);
                    }
                    if let Verdict::Failed(reason) = unit.verdict {
                        warn!("'before' failed in {}: {}", exp.title(), reason);
                        self.skip_subtree(exp);
                        return;
                    }
                }
            }

            let mut line = lineage;
            line.push(exp);

            let mut batch: Vec<&Node> = Vec::new();
            for child in &exp.children {
                if !self.participates(child) {
                    continue;
                }
                let parallel = child.options().parallel.unwrap_or(self.default_parallel);
                if parallel {
                    batch.push(child);
                    continue;
                }
                self.flush(&mut batch, &line).await;
                self.run_child(child, &line).await;
                clock().rest().await;
            }
            self.flush(&mut batch, &line).await;

            if run_hooks {
                for hook in &exp.after {
                    let unit = self
                        .run_unit(format!("After {}", exp.title()), hook, exp.options.timeout)
                        .await;
                    if let Some(stray) = unit.stray {
                        self.ctx.push_error(stray);
                    }
                    if let Verdict::Failed(reason) = unit.verdict {
                        self.ctx.push_error(format!(
                            "'after' action failed in experiment \"{}\": {reason}",
                            exp.title()
                        ));
                    }
                }
            }
        })
    }

    /// Launch every member of the pending batch before awaiting any of them.
    async fn flush<'s>(&'s self, batch: &mut Vec<&'s Node>, line: &[&'s Experiment]) {
        if batch.is_empty() {
            return;
        }
        let members = std::mem::take(batch);
        if members.len() == 1 {
            self.run_child(members[0], line).await;
        } else {
            join_all(members.into_iter().map(|node| self.run_child(node, line))).await;
        }
        clock().rest().await;
    }

    async fn run_child<'s>(&'s self, node: &'s Node, line: &[&'s Experiment]) {
        match node {
            Node::Test(test) => self.run_test(test, line).await,
            Node::Experiment(exp) => self.run_experiment(exp, line.to_vec()).await,
        }
    }

    fn participates(&self, node: &Node) -> bool {
        match node {
            Node::Test(test) => self.filter.admits(test),
            Node::Experiment(exp) => self.filter.admits_any(exp),
        }
    }

    async fn run_test(&self, test: &Test, line: &[&Experiment]) {
        let mut record = TestRecord::pending(test.id, &test.path);

        // Skipped and todo tests are finalized without invoking any hooks.
        let func = match &test.func {
            Some(func) if !test.options.skip => func.clone(),
            _ => {
                record.state = TestState::Skipped;
                self.finish(record);
                return;
            }
        };

        record.state = TestState::Running;
        if let Some(observer) = self.observer {
            observer.test_started(&record);
        }
        debug!("running {}", test.path);

        let timer = Timer::start();
        let mut stray: Option<String> = None;

        for exp in line {
            for hook in &exp.before_each {
                let unit = self
                    .run_unit(
                        format!("Before each {}", exp.title()),
                        hook,
                        test.options.timeout,
                    )
                    .await;
                if stray.is_none() {
                    stray = unit.stray;
                }
                if let Verdict::Failed(reason) = unit.verdict {
                    debug!("'before each' failed for {}: {}", test.path, reason);
                    record.state = TestState::Skipped;
                    record.err = Some("'before each' action failed".to_string());
                    record.duration_ms = timer.elapsed_ms();
                    self.finish(record);
                    return;
                }
            }
        }

        let body: TestFn = if self.filter.dry {
            Arc::new(|completion: Completion| completion.pass())
        } else {
            func
        };
        let unit = self
            .run_unit(test.path.clone(), &body, test.options.timeout)
            .await;
        let mut verdict = unit.verdict;
        if stray.is_none() {
            stray = unit.stray;
        }

        // after-each chains run regardless of the body's outcome.
        for exp in line.iter().rev() {
            for hook in &exp.after_each {
                let unit = self
                    .run_unit(
                        format!("After each {}", exp.title()),
                        hook,
                        test.options.timeout,
                    )
                    .await;
                if stray.is_none() {
                    stray = unit.stray;
                }
                if matches!(unit.verdict, Verdict::Failed(_)) && verdict == Verdict::Passed {
                    verdict = Verdict::Failed("'after each' action failed".to_string());
                }
            }
        }

        if let Some(message) = stray {
            verdict = Verdict::Failed(message);
        }

        record.duration_ms = timer.elapsed_ms();
        match verdict {
            Verdict::Passed => record.state = TestState::Passed,
            Verdict::Failed(err) => {
                record.state = TestState::Failed;
                record.err = Some(err);
            }
        }
        self.finish(record);
    }

    /// Run one body or hook under its own boundary and deadline. The
    /// boundary is active exactly for the duration of this call, which is
    /// what makes stray attribution temporal rather than lexical.
    async fn run_unit(&self, title: String, func: &TestFn, timeout: Duration) -> Unit {
        let boundary = Boundary::new(title);
        self.ctx.activate(&boundary);
        let completion = Completion::new(boundary.clone(), self.ctx.clone());

        {
            let func = func.clone();
            let handle = completion.clone();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(move || func(handle))) {
                completion.fail(panic_message(panic));
            }
        }

        let verdict = if timeout.is_zero() {
            boundary.wait().await
        } else {
            tokio::select! {
                verdict = boundary.wait() => verdict,
                () = clock().sleep(timeout) => {
                    boundary.finalize(Verdict::Failed(format!(
                        "Timed out ({}ms)",
                        timeout.as_millis()
                    )));
                    boundary.wait().await
                }
            }
        };

        self.ctx.deactivate(&boundary);
        Unit {
            verdict,
            stray: boundary.stray_override(),
        }
    }

    /// A failed `before` hook skips every participating descendant test.
    /// The hook failure itself is recorded as the error of the first such
    /// test only.
    fn skip_subtree(&self, exp: &Experiment) {
        let mut first = true;
        self.skip_descendants(exp, &mut first);
    }

    fn skip_descendants(&self, exp: &Experiment, first: &mut bool) {
        for child in &exp.children {
            match child {
                Node::Test(test) if self.filter.admits(test) => {
                    let err = if *first {
                        *first = false;
                        Some("'before' action failed".to_string())
                    } else {
                        None
                    };
                    self.finish(TestRecord::skipped(test.id, &test.path, err));
                }
                Node::Test(_) => {}
                Node::Experiment(inner) => self.skip_descendants(inner, first),
            }
        }
    }

    fn finish(&self, record: TestRecord) {
        if let Some(observer) = self.observer {
            observer.test_finished(&record);
        }
        self.records.lock().unwrap().push(record);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_string()
    }
}
