//! Lexer module for the account query language

pub mod scanner;
pub mod token;

pub use scanner::*;
pub use token::*;
