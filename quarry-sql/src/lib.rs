//! Quarry SQL - Template Compiler
//!
//! Symbolic SQL templates with table (`t:`), column (`c:`) and parameter
//! (`:`) markers, compiled into executable statements with a fixed bind
//! order. Also builds the canonical insert/select/update/touch-lock
//! statements for table descriptors.

pub mod aliases;
pub mod builders;
pub mod compiler;
pub mod lexer;
pub mod statement;

pub use aliases::{AliasRegistry, ColumnAliases};
pub use builders::{named_select, CanonicalStatements};
pub use compiler::{compile, Resolver};
pub use lexer::{Lexer, Span, Token, TokenKind};
pub use statement::{CompiledStatement, StatementScope};
