//! Tree model for experiments, tests, and hooks
//!
//! The model is frozen by [`Script::compile`](crate::script::Script::compile)
//! and is read-only during execution: option inheritance is resolved, dotted
//! paths are built, and test ids are assigned by a depth-first traversal of
//! the unfiltered tree, so ids stay stable no matter how a later run filters.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::executor::Completion;

/// Default per-node timeout applied at the root of every tree. Nodes inherit
/// it unless they declare their own; an explicit zero disables the deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// A test or hook body. Bodies receive a [`Completion`] handle and signal
/// their outcome through it, possibly from spawned asynchronous work.
pub type TestFn = Arc<dyn Fn(Completion) + Send + Sync + 'static>;

/// Per-node options resolved against the ancestor chain.
///
/// `parallel` left unresolved (`None`) falls back to the run-level default
/// at execution time. `skip` inherits the ancestor's resolved value unless
/// the node declared its own, so an explicit `skip(false)` un-skips a
/// subtree beneath a skipped ancestor.
#[derive(Clone, Debug)]
pub struct ResolvedOptions {
    pub parallel: Option<bool>,
    pub skip: bool,
    pub timeout: Duration,
}

impl ResolvedOptions {
    /// Options in effect at the root of a tree.
    pub fn root() -> Self {
        Self {
            parallel: None,
            skip: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A named group of tests, nested experiments, and hooks.
#[derive(Clone)]
pub struct Experiment {
    pub name: String,
    pub path: String,
    pub options: ResolvedOptions,
    pub children: Vec<Node>,
    pub before: Vec<TestFn>,
    pub after: Vec<TestFn>,
    pub before_each: Vec<TestFn>,
    pub after_each: Vec<TestFn>,
}

impl Experiment {
    /// Display name used in hook boundary titles. The root experiment is
    /// anonymous and renders as "script".
    pub fn title(&self) -> &str {
        if self.name.is_empty() {
            "script"
        } else {
            &self.name
        }
    }

    /// Total number of tests in this subtree, before filtering.
    pub fn test_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                Node::Test(_) => 1,
                Node::Experiment(exp) => exp.test_count(),
            })
            .sum()
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("path", &self.path)
            .field("children", &self.children.len())
            .finish()
    }
}

/// A single test. `func` is `None` for a todo placeholder, which is never
/// executed and is recorded as skipped.
#[derive(Clone)]
pub struct Test {
    pub name: String,
    pub path: String,
    pub id: u32,
    pub options: ResolvedOptions,
    pub func: Option<TestFn>,
}

impl Test {
    pub fn is_todo(&self) -> bool {
        self.func.is_none()
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("todo", &self.is_todo())
            .finish()
    }
}

/// A node in the frozen tree.
#[derive(Clone, Debug)]
pub enum Node {
    Experiment(Experiment),
    Test(Test),
}

impl Node {
    pub fn options(&self) -> &ResolvedOptions {
        match self {
            Node::Experiment(exp) => &exp.options,
            Node::Test(test) => &test.options,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Node::Experiment(exp) => &exp.path,
            Node::Test(test) => &test.path,
        }
    }
}

/// An immutable, executable tree. Trees are cheap to clone (bodies are
/// shared) and may be executed any number of times with different options.
#[derive(Clone, Debug)]
pub struct Tree {
    pub root: Experiment,
}

impl Tree {
    /// Total number of declared tests, before filtering.
    pub fn test_count(&self) -> usize {
        self.root.test_count()
    }
}

/// Join a parent path and a node name into a dotted path.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "outer"), "outer");
        assert_eq!(join_path("outer", "inner"), "outer.inner");
    }

    #[test]
    fn test_root_options() {
        let options = ResolvedOptions::root();
        assert_eq!(options.parallel, None);
        assert!(!options.skip);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_experiment_title() {
        let root = Experiment {
            name: String::new(),
            path: String::new(),
            options: ResolvedOptions::root(),
            children: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
        };
        assert_eq!(root.title(), "script");

        let named = Experiment {
            name: "math".to_string(),
            path: "math".to_string(),
            ..root
        };
        assert_eq!(named.title(), "math");
    }
}
