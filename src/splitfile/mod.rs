//! Splitfile parsing and execution (spec §4.5): a small declarative build language that
//! produces repository images the way a Dockerfile produces image layers.

pub mod ast;
pub mod executor;
pub mod parser;
pub mod provenance;

pub use ast::{Command, ImportTable, Splitfile};
pub use executor::{Executor, RemoteSource, StepOutcome};
