//! Lexer module for SQL templates

pub mod scanner;
pub mod token;

pub use scanner::*;
pub use token::*;
