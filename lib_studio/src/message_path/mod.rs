//! # Message Path Engine
//!
//! A small query language that selects values from a decoded message:
//!
//! ```text
//! /odom.pose.covariance[0:3]
//! /diagnostics.status[:]{level==2}.name
//! ```
//!
//! `parse` compiles the text once into an immutable `ParsedPath`; `evaluate`
//! then runs it against any number of messages. Both are pure functions.

pub mod ast;
pub mod error;
pub mod evaluator;
mod lexer;
pub mod parser;
pub mod tokens;

pub use ast::{ComparisonOp, FilterLiteral, FilterStep, ParsedPath, PathStep};
pub use error::{MultipleResultsError, ParseError, ParseErrorKind};
pub use evaluator::{evaluate, evaluate_single, PathValues};
pub use parser::parse;
