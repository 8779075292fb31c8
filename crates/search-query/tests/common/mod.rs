//! Test infrastructure for the search query compiler.
//!
//! Fixtures are indexed into an in-memory SQLite database laid out like the
//! production schema, and searches run through the full parse, plan, render
//! and execute path.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
