//! Lexer module: turns source text into tokens for the compiler.

pub mod scanner;
pub mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind};
