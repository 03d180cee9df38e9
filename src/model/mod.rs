//! Data model: the frozen experiment tree and the notebook result record.

pub mod node;
pub mod notebook;

pub use node::{join_path, Experiment, Node, ResolvedOptions, Test, TestFn, Tree, DEFAULT_TIMEOUT};
pub use notebook::{Notebook, TestRecord, TestState};
