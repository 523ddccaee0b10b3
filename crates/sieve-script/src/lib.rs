//! Compiler for the line-oriented check script language used by sieve.
//!
//! A script is an optional JSON `[SETTINGS]` block followed by a `[SCRIPT]`
//! section of one operation per logical line. Produces a typed
//! [`ScriptProgram`] of [`Step`]s.
//!
//! # Example
//! ```
//! let source = "REQUEST GET \"https://example.com/\"\nKEYCHECK KEYCHAIN success OR KEY \"Welcome\"";
//! let program = sieve_script::compile(source).unwrap();
//! assert_eq!(program.steps.len(), 2);
//! assert_eq!(program.steps[0].operation.kind(), "REQUEST");
//! ```

pub mod ast;
mod parser;
mod tokens;

pub use ast::*;
pub use parser::compile;
