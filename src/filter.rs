//! Test selection: id sets, path patterns, and dry runs
//!
//! A test excluded by `ids` or `grep` never appears in the notebook, not
//! even as skipped, and an experiment none of whose descendants participate
//! runs no hooks at all. Multiple criteria compose by intersection. `dry`
//! replaces every admitted test body with an immediately-passing no-op while
//! hooks still run, which validates tree shape and counts without executing
//! user logic.

use std::collections::HashSet;

use regex::Regex;

use crate::error::EngineError;
use crate::executor::ExecuteOptions;
use crate::model::{Experiment, Node, Test};

/// Compiled selection policy for one execution pass.
pub struct Filter {
    ids: Option<HashSet<u32>>,
    grep: Option<Regex>,
    pub dry: bool,
}

impl Filter {
    pub fn from_options(options: &ExecuteOptions) -> Result<Self, EngineError> {
        let grep = match &options.grep {
            Some(pattern) => Some(Regex::new(pattern)?),
            None => None,
        };
        Ok(Self {
            ids: options.ids.clone(),
            grep,
            dry: options.dry,
        })
    }

    /// Select everything; used when executing without options.
    pub fn all() -> Self {
        Self {
            ids: None,
            grep: None,
            dry: false,
        }
    }

    /// Whether a test participates in this run.
    pub fn admits(&self, test: &Test) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&test.id) {
                return false;
            }
        }
        if let Some(grep) = &self.grep {
            if !grep.is_match(&test.path) {
                return false;
            }
        }
        true
    }

    /// Whether any test in the subtree participates.
    pub fn admits_any(&self, experiment: &Experiment) -> bool {
        experiment.children.iter().any(|child| match child {
            Node::Test(test) => self.admits(test),
            Node::Experiment(exp) => self.admits_any(exp),
        })
    }
}
