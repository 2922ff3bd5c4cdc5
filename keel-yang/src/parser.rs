//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! YANG statement-level parser (RFC 7950 section 6).
//!
//! The output is a plain statement tree; all semantic processing (grouping
//! expansion, augments, type resolution) happens in the schema builder.

use crate::error::Error;

/// One YANG statement: `keyword [argument] (";" | "{" substatements "}")`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Statement {
    pub keyword: String,
    pub arg: Option<String>,
    pub children: Vec<Statement>,
    pub line: usize,
}

#[derive(Debug)]
enum Token {
    Str(String),
    Semicolon,
    LBrace,
    RBrace,
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
}

// ===== impl Statement =====

impl Statement {
    /// First substatement with the given keyword.
    pub fn child(&self, keyword: &str) -> Option<&Statement> {
        self.children.iter().find(|stmt| stmt.keyword == keyword)
    }

    /// All substatements with the given keyword.
    pub fn children_named<'a>(
        &'a self,
        keyword: &'a str,
    ) -> impl Iterator<Item = &'a Statement> + 'a {
        self.children.iter().filter(move |stmt| stmt.keyword == keyword)
    }

    /// Argument of the first substatement with the given keyword.
    pub fn child_arg(&self, keyword: &str) -> Option<&str> {
        self.child(keyword).and_then(|stmt| stmt.arg.as_deref())
    }

    pub fn arg(&self) -> &str {
        self.arg.as_deref().unwrap_or("")
    }
}

// ===== impl Lexer =====

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Lexer<'a> {
        Lexer {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
        }
        Some(ch)
    }

    // Skips whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), Error> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.input.get(self.pos + 1) == Some(&b'/') => {
                    while let Some(ch) = self.bump() {
                        if ch == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.input.get(self.pos + 1) == Some(&b'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some(b'*') if self.peek() == Some(b'/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => (),
                            None => {
                                return Err(
                                    self.error("unterminated block comment")
                                );
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn quoted_string(&mut self, quote: u8) -> Result<String, Error> {
        let mut out = Vec::new();
        loop {
            match self.bump() {
                Some(ch) if ch == quote => break,
                Some(b'\\') if quote == b'"' => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'"') => out.push(b'"'),
                    Some(b'\\') => out.push(b'\\'),
                    _ => return Err(self.error("invalid escape sequence")),
                },
                Some(ch) => out.push(ch),
                None => return Err(self.error("unterminated string")),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn next_token(&mut self) -> Result<Option<Token>, Error> {
        self.skip_trivia()?;
        let Some(ch) = self.peek() else {
            return Ok(None);
        };

        match ch {
            b';' => {
                self.bump();
                Ok(Some(Token::Semicolon))
            }
            b'{' => {
                self.bump();
                Ok(Some(Token::LBrace))
            }
            b'}' => {
                self.bump();
                Ok(Some(Token::RBrace))
            }
            b'"' | b'\'' => {
                self.bump();
                let mut out = self.quoted_string(ch)?;
                // Adjacent strings joined with "+" form a single argument.
                loop {
                    let save = (self.pos, self.line);
                    self.skip_trivia()?;
                    if self.peek() == Some(b'+') {
                        self.bump();
                        self.skip_trivia()?;
                        match self.peek() {
                            Some(q @ (b'"' | b'\'')) => {
                                self.bump();
                                out.push_str(&self.quoted_string(q)?);
                            }
                            _ => {
                                return Err(self
                                    .error("expected string after '+'"));
                            }
                        }
                    } else {
                        (self.pos, self.line) = save;
                        break;
                    }
                }
                Ok(Some(Token::Str(out)))
            }
            _ => {
                // Unquoted string: runs until whitespace or a delimiter.
                let start = self.pos;
                while let Some(ch) = self.peek() {
                    if ch.is_ascii_whitespace()
                        || matches!(ch, b';' | b'{' | b'}' | b'"' | b'\'')
                    {
                        break;
                    }
                    // A comment terminates an unquoted string.
                    if ch == b'/'
                        && matches!(
                            self.input.get(self.pos + 1),
                            Some(b'/') | Some(b'*')
                        )
                    {
                        break;
                    }
                    self.bump();
                }
                let s = std::str::from_utf8(&self.input[start..self.pos])
                    .map_err(|_| self.error("invalid utf-8"))?;
                Ok(Some(Token::Str(s.to_owned())))
            }
        }
    }
}

// ===== helper functions =====

fn parse_statement(
    lexer: &mut Lexer<'_>,
    keyword: String,
    line: usize,
) -> Result<Statement, Error> {
    let mut stmt = Statement {
        keyword,
        arg: None,
        children: vec![],
        line,
    };

    // Optional argument.
    let token = match lexer.next_token()? {
        Some(Token::Str(arg)) => {
            stmt.arg = Some(arg);
            lexer.next_token()?
        }
        token => token,
    };

    match token {
        Some(Token::Semicolon) => Ok(stmt),
        Some(Token::LBrace) => {
            loop {
                let line = lexer.line;
                match lexer.next_token()? {
                    Some(Token::RBrace) => break,
                    Some(Token::Str(keyword)) => {
                        stmt.children
                            .push(parse_statement(lexer, keyword, line)?);
                    }
                    Some(_) => {
                        return Err(lexer.error("expected statement keyword"));
                    }
                    None => return Err(lexer.error("unexpected end of input")),
                }
            }
            Ok(stmt)
        }
        _ => Err(lexer.error(format!(
            "expected ';' or '{{' after statement {}",
            stmt.keyword
        ))),
    }
}

// ===== global functions =====

/// Parses one YANG module or submodule from text into a statement tree.
pub fn parse_module(text: &str) -> Result<Statement, Error> {
    let mut lexer = Lexer::new(text);

    let line = lexer.line;
    let stmt = match lexer.next_token()? {
        Some(Token::Str(keyword))
            if keyword == "module" || keyword == "submodule" =>
        {
            parse_statement(&mut lexer, keyword, line)?
        }
        _ => {
            return Err(lexer
                .error("expected top-level module or submodule statement"));
        }
    };

    // Nothing but trivia may follow the top-level statement.
    if lexer.next_token()?.is_some() {
        return Err(lexer.error("trailing content after module statement"));
    }
    if stmt.arg.is_none() {
        return Err(lexer.error("module statement requires a name"));
    }

    Ok(stmt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_tree() {
        let stmt = parse_module(
            r#"module test {
                 namespace "urn:example:test";
                 prefix t; // trailing comment
                 /* block
                    comment */
                 container top {
                   leaf x { type uint8; }
                 }
               }"#,
        )
        .unwrap();

        assert_eq!(stmt.keyword, "module");
        assert_eq!(stmt.arg(), "test");
        assert_eq!(stmt.child_arg("namespace"), Some("urn:example:test"));
        assert_eq!(stmt.child_arg("prefix"), Some("t"));
        let top = stmt.child("container").unwrap();
        let leaf = top.child("leaf").unwrap();
        assert_eq!(leaf.child_arg("type"), Some("uint8"));
    }

    #[test]
    fn string_concatenation() {
        let stmt = parse_module(
            "module test {\n namespace \"urn:\" + \"example\";\n prefix t;\n}",
        )
        .unwrap();
        assert_eq!(stmt.child_arg("namespace"), Some("urn:example"));
    }

    #[test]
    fn unterminated_string() {
        assert!(parse_module("module test { namespace \"urn").is_err());
    }
}
