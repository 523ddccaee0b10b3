//! Token cursor over one logical script line.
//!
//! A token is either a double-quoted literal (`\"` unescapes to `"`, any other
//! backslash pair is kept verbatim) or a run of non-whitespace characters.
//! Whitespace after each token is skipped.

use winnow::token::{any, take_till};
use winnow::{ModalResult, Parser};

use crate::ast::OutputTarget;

/// Parse a double-quoted literal.
fn quoted(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = any.parse_next(input)?;
        match c {
            '"' => break,
            '\\' => {
                let esc = any.parse_next(input)?;
                if esc != '"' {
                    s.push('\\');
                }
                s.push(esc);
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

/// Parse a bare word: one or more non-whitespace characters.
fn bare_word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_till(1.., |c: char| c.is_whitespace()).parse_next(input)
}

pub(crate) struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    pub(crate) fn new(line: &'a str) -> Self {
        Self {
            rest: line.trim_start(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    /// Next bare word, or `None` at end of line.
    pub(crate) fn word(&mut self) -> Option<&'a str> {
        let mut input = self.rest;
        let word = bare_word.parse_next(&mut input).ok()?;
        self.rest = input.trim_start();
        Some(word)
    }

    pub(crate) fn peek_word(&self) -> Option<&'a str> {
        let mut input = self.rest;
        bare_word.parse_next(&mut input).ok()
    }

    /// Next literal. A bare word is accepted where a literal is expected, and
    /// an unterminated literal runs to the end of the line.
    pub(crate) fn literal(&mut self) -> Option<String> {
        if self.rest.is_empty() {
            return None;
        }
        if !self.rest.starts_with('"') {
            return self.word().map(str::to_string);
        }
        let mut input = self.rest;
        match quoted.parse_next(&mut input) {
            Ok(value) => {
                self.rest = input.trim_start();
                Some(value)
            }
            Err(_) => {
                let value = self.rest[1..].replace("\\\"", "\"");
                self.rest = "";
                Some(value)
            }
        }
    }

    /// Remainder of `-> VAR "name"` / `-> CAP "name"` after the arrow.
    pub(crate) fn output(&mut self) -> Option<OutputTarget> {
        let capture = match self.word()?.to_ascii_uppercase().as_str() {
            "VAR" => false,
            "CAP" => true,
            _ => return None,
        };
        let name = self.literal()?;
        Some(OutputTarget { name, capture })
    }
}

/// Parse an inline `NAME=true|false` flag token.
pub(crate) fn flag(token: &str, name: &str) -> Option<bool> {
    let (key, value) = token.split_once('=')?;
    if !key.eq_ignore_ascii_case(name) {
        return None;
    }
    parse_bool(value)
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
