//! Execution core of a process-orchestration engine.
//!
//! A `ProcessDefinition` is an immutable graph of activities and
//! transitions. At runtime each instance is a tree of executions
//! ("tokens") that fork at parallel splits and synchronize at joins.
//! The engine drains an explicit queue of "execution arrived at
//! activity" events and dispatches them to activity behaviors, which
//! advance the tree.

pub mod behaviors;
pub mod model;
pub mod runtime;
