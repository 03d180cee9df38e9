//! Script builder: the declaration surface that stages experiments, tests,
//! and hooks, then freezes them into the immutable tree model
//!
//! Declaration calls append to mutable staging lists; [`Script::compile`]
//! resolves option inheritance, builds dotted paths, assigns test ids by
//! depth-first declaration order, and hands back a read-only [`Tree`].
//! Scripts are reusable: the same script may be compiled and executed any
//! number of times, and execution never mutates it.

use std::cell::Cell;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::error::ScriptError;
use crate::executor::Completion;
use crate::model::{join_path, Experiment, Node, ResolvedOptions, Test, TestFn, Tree};

/// Per-node declaration options.
#[derive(Clone, Debug, Default)]
pub struct Options {
    parallel: Option<bool>,
    skip: Option<bool>,
    timeout: Option<Duration>,
    id: Option<u32>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow this node to run concurrently with adjacent parallel siblings.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Skip this node and everything beneath it. An explicit `skip(false)`
    /// un-skips a subtree under a skipped ancestor.
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Deadline for this node's body and hooks. Zero disables the deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deadline in milliseconds.
    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    /// Override the sequentially assigned test id.
    pub fn id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }
}

/// Script-level options.
#[derive(Clone, Copy, Debug)]
pub struct ScriptOptions {
    /// Register the compiled tree in the ambient registry so an outer
    /// harness can auto-run it. On by default.
    pub schedule: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self { schedule: true }
    }
}

#[derive(Default)]
struct StagedExperiment {
    name: String,
    options: Options,
    children: Vec<StagedNode>,
    before: Vec<TestFn>,
    after: Vec<TestFn>,
    before_each: Vec<TestFn>,
    after_each: Vec<TestFn>,
}

enum StagedNode {
    Experiment(StagedExperiment),
    Test(StagedTest),
}

struct StagedTest {
    name: String,
    options: Options,
    func: Option<TestFn>,
}

/// The mutable declaration surface for one experiment scope. Closures
/// passed to [`Scope::experiment`] receive the nested scope.
pub struct Scope<'a> {
    staged: &'a mut StagedExperiment,
}

impl Scope<'_> {
    /// Declare a nested experiment.
    pub fn experiment<F>(&mut self, name: impl Into<String>, build: F)
    where
        F: FnOnce(&mut Scope<'_>),
    {
        self.experiment_opts(name, Options::new(), build);
    }

    /// Declare a nested experiment with options.
    pub fn experiment_opts<F>(&mut self, name: impl Into<String>, options: Options, build: F)
    where
        F: FnOnce(&mut Scope<'_>),
    {
        let mut staged = StagedExperiment {
            name: name.into(),
            options,
            ..StagedExperiment::default()
        };
        build(&mut Scope {
            staged: &mut staged,
        });
        self.staged.children.push(StagedNode::Experiment(staged));
    }

    /// Declare a test.
    pub fn test<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.test_opts(name, Options::new(), func);
    }

    /// Declare a test with options.
    pub fn test_opts<F>(&mut self, name: impl Into<String>, options: Options, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.staged.children.push(StagedNode::Test(StagedTest {
            name: name.into(),
            options,
            func: Some(std::sync::Arc::new(func)),
        }));
    }

    /// Declare a todo placeholder: recorded as skipped, never executed.
    pub fn todo(&mut self, name: impl Into<String>) {
        self.staged.children.push(StagedNode::Test(StagedTest {
            name: name.into(),
            options: Options::new(),
            func: None,
        }));
    }

    /// Run once before this experiment's children.
    pub fn before<F>(&mut self, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.staged.before.push(std::sync::Arc::new(func));
    }

    /// Run once after this experiment's children.
    pub fn after<F>(&mut self, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.staged.after.push(std::sync::Arc::new(func));
    }

    /// Run before every descendant test.
    pub fn before_each<F>(&mut self, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.staged.before_each.push(std::sync::Arc::new(func));
    }

    /// Run after every descendant test.
    pub fn after_each<F>(&mut self, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.staged.after_each.push(std::sync::Arc::new(func));
    }
}

/// A staged test script.
pub struct Script {
    options: ScriptOptions,
    root: StagedExperiment,
    registered: Cell<bool>,
}

impl Script {
    pub fn new() -> Self {
        Self::with_options(ScriptOptions::default())
    }

    pub fn with_options(options: ScriptOptions) -> Self {
        Self {
            options,
            root: StagedExperiment::default(),
            registered: Cell::new(false),
        }
    }

    fn root_scope(&mut self) -> Scope<'_> {
        Scope {
            staged: &mut self.root,
        }
    }

    /// Declare a top-level experiment.
    pub fn experiment<F>(&mut self, name: impl Into<String>, build: F)
    where
        F: FnOnce(&mut Scope<'_>),
    {
        self.root_scope().experiment(name, build);
    }

    /// Declare a top-level experiment with options.
    pub fn experiment_opts<F>(&mut self, name: impl Into<String>, options: Options, build: F)
    where
        F: FnOnce(&mut Scope<'_>),
    {
        self.root_scope().experiment_opts(name, options, build);
    }

    /// Declare a top-level test.
    pub fn test<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.root_scope().test(name, func);
    }

    /// Run once before anything in the script.
    pub fn before<F>(&mut self, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.root_scope().before(func);
    }

    /// Run once after everything in the script.
    pub fn after<F>(&mut self, func: F)
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.root_scope().after(func);
    }

    /// Freeze the staged declarations into an immutable tree. Fails only on
    /// structural problems; runtime behavior is never validated here.
    pub fn compile(&self) -> Result<Tree, ScriptError> {
        let mut counter = 0u32;
        let mut used_ids = std::collections::HashSet::new();
        let root = freeze_experiment(
            &self.root,
            &ResolvedOptions::root(),
            "",
            &mut counter,
            &mut used_ids,
        )?;
        let tree = Tree { root };

        if self.options.schedule && !self.registered.get() {
            register(tree.clone());
            self.registered.set(true);
        }
        Ok(tree)
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(options: &Options, parent: &ResolvedOptions) -> ResolvedOptions {
    ResolvedOptions {
        parallel: options.parallel.or(parent.parallel),
        skip: options.skip.unwrap_or(parent.skip),
        timeout: options.timeout.unwrap_or(parent.timeout),
    }
}

fn freeze_experiment(
    staged: &StagedExperiment,
    parent: &ResolvedOptions,
    parent_path: &str,
    counter: &mut u32,
    used_ids: &mut std::collections::HashSet<u32>,
) -> Result<Experiment, ScriptError> {
    // Only the anonymous root may be unnamed.
    if staged.name.is_empty() && !parent_path.is_empty() {
        return Err(ScriptError::EmptyName { kind: "experiment" });
    }

    let options = resolve(&staged.options, parent);
    let path = join_path(parent_path, &staged.name);

    let mut children = Vec::with_capacity(staged.children.len());
    for child in &staged.children {
        match child {
            StagedNode::Experiment(exp) => {
                if exp.name.is_empty() {
                    return Err(ScriptError::EmptyName { kind: "experiment" });
                }
                children.push(Node::Experiment(freeze_experiment(
                    exp, &options, &path, counter, used_ids,
                )?));
            }
            StagedNode::Test(test) => {
                if test.name.is_empty() {
                    return Err(ScriptError::EmptyName { kind: "test" });
                }
                *counter += 1;
                let id = test.options.id.unwrap_or(*counter);
                if !used_ids.insert(id) {
                    return Err(ScriptError::DuplicateId(id));
                }
                children.push(Node::Test(Test {
                    name: test.name.clone(),
                    path: join_path(&path, &test.name),
                    id,
                    options: resolve(&test.options, &options),
                    func: test.func.clone(),
                }));
            }
        }
    }

    Ok(Experiment {
        name: staged.name.clone(),
        path,
        options,
        children,
        before: staged.before.clone(),
        after: staged.after.clone(),
        before_each: staged.before_each.clone(),
        after_each: staged.after_each.clone(),
    })
}

static SCHEDULED: OnceLock<Mutex<Vec<Tree>>> = OnceLock::new();

fn register(tree: Tree) {
    SCHEDULED
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .unwrap()
        .push(tree);
}

/// Drain the ambient registry of trees compiled from scripts with
/// `schedule: true`.
pub fn scheduled() -> Vec<Tree> {
    match SCHEDULED.get() {
        Some(registry) => std::mem::take(&mut registry.lock().unwrap()),
        None => Vec::new(),
    }
}
