//! Parser module for the account query language

pub mod ast;
pub mod parser;

pub use ast::*;
pub use parser::*;
