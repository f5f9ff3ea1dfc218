pub mod lexer;

use crate::fixture::{ErrorPattern, Expectation, Fixture, FixtureName, Row, RowOrder, Statement, Value};
use lexer::{line_col, tokenize, SpannedToken, Token};
use miette::{Diagnostic, SourceSpan};
use std::ops::Range;

/// Parse a `.regress` file into a fixture
pub fn parse(input: &str) -> Result<Fixture, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(input, tokens);
    parser.parse()
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
}

/// Header directives collected before building the fixture
#[derive(Default)]
struct Header {
    name: Option<(FixtureName, Range<usize>)>,
    dependencies: Vec<(FixtureName, Range<usize>)>,
    skip: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, tokens: Vec<SpannedToken>) -> Self {
        Self {
            input,
            tokens,
            pos: 0,
        }
    }

    fn parse(&mut self) -> Result<Fixture, ParseError> {
        let mut header = Header::default();
        let mut statements = Vec::new();
        let mut pending_skip: Option<(String, Range<usize>)> = None;

        while !self.is_at_end() {
            self.skip_newlines_and_comments();

            match self.peek() {
                Some(Token::AtFixture) => {
                    let span = self.current_span();
                    self.advance();
                    if header.name.is_some() {
                        return Err(ParseError::ValidationError {
                            message: "a file declares exactly one fixture".to_string(),
                            span: Some(to_source_span(&span)),
                            help: Some("split the file into one file per fixture".to_string()),
                        });
                    }
                    let (name, name_span) = self.expect_name_with_span()?;
                    header.name = Some((FixtureName::new(name), name_span));
                }
                Some(Token::AtDependsOn) => {
                    self.advance();
                    let first = self.expect_name_with_span()?;
                    header
                        .dependencies
                        .push((FixtureName::new(first.0), first.1));
                    while let Some(name) = self.peek().and_then(Token::as_name) {
                        let name = FixtureName::new(name);
                        let span = self.current_span();
                        self.advance();
                        header.dependencies.push((name, span));
                    }
                }
                Some(Token::AtSkipFixture) => {
                    self.advance();
                    header.skip = Some(self.expect_string()?);
                }
                Some(Token::AtSkip) => {
                    let span = self.current_span();
                    self.advance();
                    pending_skip = Some((self.expect_string()?, span));
                }
                Some(Token::Statement) => {
                    let skip = pending_skip.take().map(|(reason, _)| reason);
                    statements.push(self.parse_statement(skip)?);
                }
                Some(token) => {
                    return Err(self.error(format!("unexpected token: {token}")));
                }
                None => break,
            }
        }

        if let Some((_, span)) = pending_skip {
            return Err(ParseError::ValidationError {
                message: "@skip is not followed by a statement".to_string(),
                span: Some(to_source_span(&span)),
                help: None,
            });
        }

        self.build(header, statements)
    }

    fn parse_statement(&mut self, skip: Option<String>) -> Result<Statement, ParseError> {
        let keyword_span = self.current_span();
        self.expect_token(Token::Statement)?;
        let block_span = self.current_span();
        let content = self.expect_block_content()?;
        let (line, _) = line_col(self.input, keyword_span.start);

        let text = dedent(&content);
        let mut statement =
            Statement::parse(text).map_err(|e| ParseError::ValidationError {
                message: format!("invalid statement: {e}"),
                span: Some(to_source_span(&block_span)),
                help: Some(
                    "meta-commands are psql backslash commands on their own line".to_string(),
                ),
            })?;
        statement = statement.at_line(line);
        if let Some(reason) = skip {
            statement = statement.skipped(reason);
        }

        self.skip_newlines_and_comments();
        if matches!(self.peek(), Some(Token::Expect)) {
            self.advance();
            statement = statement.with_expectation(self.parse_expectation()?);
        }
        Ok(statement)
    }

    fn parse_expectation(&mut self) -> Result<Expectation, ParseError> {
        match self.peek() {
            Some(Token::Error) => {
                self.advance();
                let (constructor, modifier): (fn(String) -> ErrorPattern, _) = match self.peek() {
                    Some(Token::Contains) => (ErrorPattern::Contains, true),
                    Some(Token::Pattern) => (ErrorPattern::Regex, true),
                    _ => (ErrorPattern::Exact, false),
                };
                if modifier {
                    self.advance();
                }
                let span = self.current_span();
                let message = dedent(&self.expect_block_content()?).trim().to_string();
                if message.is_empty() {
                    // Any error satisfies an empty expectation
                    return Ok(Expectation::Error(ErrorPattern::Contains(String::new())));
                }
                let pattern = constructor(message);
                if let ErrorPattern::Regex(re) = &pattern {
                    if let Err(e) = regex::Regex::new(re) {
                        return Err(ParseError::ValidationError {
                            message: format!("invalid error pattern: {e}"),
                            span: Some(to_source_span(&span)),
                            help: None,
                        });
                    }
                }
                Ok(Expectation::Error(pattern))
            }
            Some(Token::Unordered) => {
                self.advance();
                let rows = self.parse_rows()?;
                Ok(Expectation::Rows {
                    rows,
                    order: RowOrder::Unordered,
                })
            }
            Some(Token::BlockContent(_)) => {
                let rows = self.parse_rows()?;
                Ok(Expectation::Rows {
                    rows,
                    order: RowOrder::Ordered,
                })
            }
            Some(token) => {
                Err(self.error(format!("expected expect modifier or block, got {token}")))
            }
            None => Err(self.error("expected expect block, got EOF".to_string())),
        }
    }

    fn parse_rows(&mut self) -> Result<Vec<Row>, ParseError> {
        let span = self.current_span();
        let content = self.expect_block_content()?;
        dedent(&content)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                parse_row(line).map_err(|message| ParseError::ValidationError {
                    message: format!("invalid row `{line}`: {message}"),
                    span: Some(to_source_span(&span)),
                    help: Some(
                        "cells are separated by |; escapes are \\N \\e \\\\ \\| \\n \\t".to_string(),
                    ),
                })
            })
            .collect()
    }

    fn build(&self, header: Header, statements: Vec<Statement>) -> Result<Fixture, ParseError> {
        let Some((name, _)) = header.name else {
            return Err(ParseError::ValidationError {
                message: "missing @fixture declaration".to_string(),
                span: None,
                help: Some("start the file with `@fixture <name>`".to_string()),
            });
        };

        let mut fixture = Fixture::new(name);
        for (dependency, span) in header.dependencies {
            if fixture.dependencies.contains(&dependency) {
                return Err(ParseError::ValidationError {
                    message: format!("duplicate dependency: {dependency}"),
                    span: Some(to_source_span(&span)),
                    help: None,
                });
            }
            fixture = fixture.depends_on(dependency);
        }
        if let Some(reason) = header.skip {
            fixture = fixture.skipped(reason);
        }
        Ok(fixture.statements(statements))
    }

    fn expect_block_content(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::BlockContent(content)) => {
                let content = content.clone();
                self.advance();
                Ok(content)
            }
            Some(token) => Err(self.error(format!("expected block {{...}}, got {token}"))),
            None => Err(self.error("expected block, got EOF".to_string())),
        }
    }

    fn expect_token(&mut self, expected: Token) -> Result<(), ParseError> {
        match self.peek() {
            Some(token) if std::mem::discriminant(token) == std::mem::discriminant(&expected) => {
                self.advance();
                Ok(())
            }
            Some(token) => Err(self.error(format!("expected {expected}, got {token}"))),
            None => Err(self.error(format!("expected {expected}, got EOF"))),
        }
    }

    fn expect_name_with_span(&mut self) -> Result<(String, Range<usize>), ParseError> {
        match self.peek() {
            Some(token) => match token.as_name() {
                Some(name) => {
                    let name = name.to_string();
                    let span = self.current_span();
                    self.advance();
                    Ok((name, span))
                }
                None => Err(self.error(format!("expected fixture name, got {token}"))),
            },
            None => Err(self.error("expected fixture name, got EOF".to_string())),
        }
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::String(s)) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            Some(token) => Err(self.error(format!("expected string, got {token}"))),
            None => Err(self.error("expected string, got EOF".to_string())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn current_span(&self) -> Range<usize> {
        self.tokens
            .get(self.pos)
            .map(|t| t.span.clone())
            .unwrap_or(0..0)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn skip_newlines_and_comments(&mut self) {
        while matches!(self.peek(), Some(Token::Newline | Token::Comment(_))) {
            self.advance();
        }
    }

    fn error(&self, message: String) -> ParseError {
        let span = self
            .tokens
            .get(self.pos)
            .map(|token| to_source_span(&token.span));

        ParseError::SyntaxError {
            message,
            span,
            help: None,
        }
    }
}

fn to_source_span(span: &Range<usize>) -> SourceSpan {
    SourceSpan::new(span.start.into(), span.len())
}

/// Strip the blank first/last lines of a block and the indentation shared
/// by all non-blank lines
fn dedent(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(start), Some(end)) = (start, end) else {
        return String::new();
    };
    let lines = &lines[start..=end];

    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start_matches(' ')))
        .map(|l| l.trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split an expected-row line into cells
pub fn parse_row(line: &str) -> Result<Row, String> {
    let mut cells = Vec::new();
    let mut text = String::new();
    let mut null = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '|' => {
                cells.push(if null { Value::Null } else { Value::Text(std::mem::take(&mut text)) });
                null = false;
            }
            '\\' => {
                let escaped = chars.next().ok_or("dangling backslash")?;
                if null {
                    return Err("\\N must be the whole cell".to_string());
                }
                match escaped {
                    'N' if text.is_empty() => null = true,
                    'N' => return Err("\\N must be the whole cell".to_string()),
                    'e' => {}
                    '\\' => text.push('\\'),
                    '|' => text.push('|'),
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    other => return Err(format!("unknown escape \\{other}")),
                }
            }
            c if null => return Err(format!("\\N must be the whole cell, found `{c}` after it")),
            c => text.push(c),
        }
    }
    cells.push(if null { Value::Null } else { Value::Text(text) });
    Ok(cells)
}

#[derive(Debug, Clone, thiserror::Error, Diagnostic)]
pub enum ParseError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    LexerError(#[from] lexer::LexerError),

    #[error("{message}")]
    #[diagnostic(code(regress::syntax))]
    SyntaxError {
        message: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(regress::validation))]
    ValidationError {
        message: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[help]
        help: Option<String>,
    },
}
