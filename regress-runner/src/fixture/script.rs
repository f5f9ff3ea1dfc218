//! Lexical split of statement text into engine statements and psql-style
//! meta-commands.
//!
//! The split happens once, when a [`super::Statement`] is built. Nothing here
//! understands SQL: the scanner only tracks quoting, comments and parentheses
//! so that `;`, `\` and `:name` are recognised at the top level only.

use miette::Diagnostic;
use std::collections::HashMap;

/// How a variable reference is quoted when it is interpolated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// `:name`, value inserted verbatim
    Raw,
    /// `:'name'`, value inserted as a string literal
    Literal,
    /// `:"name"`, value inserted as a quoted identifier
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Variable { name: String, quoting: Quoting },
}

/// Source of variable values during interpolation
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<&str>;
}

impl VariableLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl VariableLookup for indexmap::IndexMap<String, String> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

struct NoVariables;

impl VariableLookup for NoVariables {
    fn lookup(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// Text with variable references kept as separate pieces
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    pieces: Vec<Piece>,
}

impl Template {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            pieces: vec![Piece::Text(text.into())],
        }
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Interpolate known variables. Unknown references are kept verbatim.
    pub fn render(&self, vars: &dyn VariableLookup) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Variable { name, quoting } => match (vars.lookup(name), quoting) {
                    (Some(value), Quoting::Raw) => out.push_str(value),
                    (Some(value), Quoting::Literal) => out.push_str(&quote_literal(value)),
                    (Some(value), Quoting::Identifier) => out.push_str(&quote_identifier(value)),
                    (None, Quoting::Raw) => {
                        out.push(':');
                        out.push_str(name);
                    }
                    (None, Quoting::Literal) => {
                        out.push_str(":'");
                        out.push_str(name);
                        out.push('\'');
                    }
                    (None, Quoting::Identifier) => {
                        out.push_str(":\"");
                        out.push_str(name);
                        out.push('"');
                    }
                },
            }
        }
        out
    }

    /// The text as written in the fixture
    pub fn source(&self) -> String {
        self.render(&NoVariables)
    }

    /// Same pieces, every variable interpolated verbatim
    fn unquoted(mut self) -> Self {
        for piece in &mut self.pieces {
            if let Piece::Variable { quoting, .. } = piece {
                *quoting = Quoting::Raw;
            }
        }
        self
    }

    /// Direction of a `COPY ... FROM STDIN` / `COPY ... TO STDOUT` statement
    pub fn copy_direction(&self) -> Option<CopyDirection> {
        let source = self.source();
        if leading_words(&source, 1).first().map(String::as_str) != Some("COPY") {
            return None;
        }
        let words = words(&source);
        let has = |a: &str, b: &str| words.windows(2).any(|w| w[0] == a && w[1] == b);
        if has("FROM", "STDIN") {
            Some(CopyDirection::FromStdin)
        } else if has("TO", "STDOUT") {
            Some(CopyDirection::ToStdout)
        } else {
            None
        }
    }

    /// Effect of this statement on the transaction nesting depth
    pub fn transaction_effect(&self) -> Option<TransactionEffect> {
        let words = leading_words(&self.source(), 4);
        let first = words.first().map(String::as_str);
        let second = words.get(1).map(String::as_str);
        // `COMMIT [WORK] AND CHAIN` opens the next transaction straight away
        let chained = words
            .windows(2)
            .any(|pair| pair[0] == "AND" && pair[1] == "CHAIN");
        match (first, second) {
            (Some("COMMIT" | "END" | "ROLLBACK" | "ABORT"), _) if chained => None,
            (Some("BEGIN"), _) | (Some("START"), Some("TRANSACTION")) => {
                Some(TransactionEffect::Begin)
            }
            (Some("COMMIT" | "ROLLBACK"), Some("PREPARED")) => None,
            (Some("ROLLBACK"), Some("TO")) => None,
            (Some("COMMIT" | "END" | "ROLLBACK" | "ABORT"), _)
            | (Some("PREPARE"), Some("TRANSACTION")) => Some(TransactionEffect::End),
            (Some("SAVEPOINT"), _) => Some(TransactionEffect::Savepoint),
            (Some("RELEASE"), _) => Some(TransactionEffect::Release),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    FromStdin,
    ToStdout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEffect {
    Begin,
    Savepoint,
    Release,
    End,
}

/// One unit of work inside a statement's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// SQL for the engine. `gset` holds the variable prefix when the query
    /// was sent with `\gset`.
    Sql {
        sql: Template,
        gset: Option<String>,
    },
    /// `COPY ... FROM STDIN` followed by inline data up to `\.`
    CopyIn { sql: Template, data: String },
    /// `\copy ... FROM 'file'`: the file is sent as COPY data
    CopyFile { sql: Template, path: Template },
    Meta(MetaCommand),
}

/// A backslash directive handled by the harness instead of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Set { name: Template, values: Vec<Template> },
    Unset { name: Template },
    GetEnv { variable: Template, env: Template },
    SetEnv { name: Template, value: Option<Template> },
    Connect {
        database: Option<Template>,
        user: Option<Template>,
    },
    If(Template),
    Elif(Template),
    Else,
    Endif,
    Quit,
    /// Display and formatting directives, accepted and ignored
    Ignored { name: String },
    /// Recognised but not executable by the harness
    Unsupported { name: String },
}

const IGNORED_COMMANDS: &[&str] = &[
    "pset", "x", "a", "t", "echo", "qecho", "warn", "timing", "o", "out", "encoding", "C", "f",
    "H", "html", "T", "prompt", "errverbose", ".",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Diagnostic)]
pub enum ScriptError {
    #[error("COPY data starting at line {line} is not terminated by \\.")]
    #[diagnostic(
        code(regress::script::unterminated_copy),
        help("end the inline data block with a line containing only \\.")
    )]
    UnterminatedCopyData { line: usize },

    #[error("\\{command} on line {line} is missing an argument")]
    #[diagnostic(code(regress::script::missing_argument))]
    MissingArgument { command: String, line: usize },

    #[error("\\{command} on line {line} has no query to send")]
    #[diagnostic(code(regress::script::empty_query))]
    NothingToSend { command: String, line: usize },
}

/// Split statement text into commands
pub fn split(src: &str) -> Result<Vec<Command>, ScriptError> {
    Splitter::new(src).run()
}

#[derive(Default)]
struct TemplateBuilder {
    pieces: Vec<Piece>,
    text: String,
}

impl TemplateBuilder {
    fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
    }

    fn push_var(&mut self, name: String, quoting: Quoting) {
        self.flush_text();
        self.pieces.push(Piece::Variable { name, quoting });
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.pieces.push(Piece::Text(std::mem::take(&mut self.text)));
        }
    }

    fn finish(mut self) -> Template {
        self.flush_text();
        Template {
            pieces: self.pieces,
        }
    }
}

/// The query buffer being accumulated
#[derive(Default)]
struct Buffer {
    template: TemplateBuilder,
    has_content: bool,
    paren_depth: usize,
}

impl Buffer {
    fn push_str(&mut self, s: &str, content: bool) {
        self.template.push_str(s);
        self.has_content |= content;
    }

    fn ends_with_ident_char(&self) -> bool {
        self.template
            .text
            .chars()
            .next_back()
            .is_some_and(is_ident_char)
    }

    fn take(&mut self) -> Option<Template> {
        let buffer = std::mem::take(self);
        if !buffer.has_content {
            return None;
        }
        let mut pieces = buffer.template.finish().pieces;
        if let Some(Piece::Text(first)) = pieces.first_mut() {
            *first = first.trim_start().to_string();
        }
        if let Some(Piece::Text(last)) = pieces.last_mut() {
            *last = last.trim_end().to_string();
        }
        pieces.retain(|p| !matches!(p, Piece::Text(t) if t.is_empty()));
        Some(Template { pieces })
    }
}

struct Splitter<'a> {
    src: &'a str,
    pos: usize,
    buffer: Buffer,
    commands: Vec<Command>,
    last_sql: Option<Template>,
}

impl<'a> Splitter<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            buffer: Buffer::default(),
            commands: Vec::new(),
            last_sql: None,
        }
    }

    fn run(mut self) -> Result<Vec<Command>, ScriptError> {
        while let Some(c) = self.peek() {
            match c {
                ';' if self.buffer.paren_depth == 0 => {
                    self.take_char(true);
                    if let Some(sql) = self.buffer.take() {
                        self.send(sql, None)?;
                    }
                }
                '\\' => self.meta()?,
                _ => self.scan_sql_char(c),
            }
        }
        if let Some(sql) = self.buffer.take() {
            self.send(sql, None)?;
        }
        Ok(self.commands)
    }

    /// Scan a SQL fragment where `;` and `\` have no special meaning
    fn fragment(mut self) -> Template {
        while let Some(c) = self.peek() {
            self.scan_sql_char(c);
        }
        self.buffer.take().unwrap_or_default()
    }

    fn scan_sql_char(&mut self, c: char) {
        match c {
            '\'' => self.quoted('\''),
            '"' => self.quoted('"'),
            '$' => self.dollar(),
            '-' if self.peek_at(1) == Some('-') => self.line_comment(),
            '/' if self.peek_at(1) == Some('*') => self.block_comment(),
            ':' => self.colon(),
            '(' => {
                self.buffer.paren_depth += 1;
                self.take_char(true);
            }
            ')' => {
                self.buffer.paren_depth = self.buffer.paren_depth.saturating_sub(1);
                self.take_char(true);
            }
            _ => self.take_char(!c.is_whitespace()),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn take_char(&mut self, content: bool) {
        if let Some(c) = self.peek() {
            let end = self.pos + c.len_utf8();
            self.buffer.push_str(&self.src[self.pos..end], content);
            self.pos = end;
        }
    }

    fn take_until(&mut self, end: usize, content: bool) {
        self.buffer.push_str(&self.src[self.pos..end], content);
        self.pos = end;
    }

    fn quoted(&mut self, quote: char) {
        let escapes = quote == '\''
            && self.buffer.template.text.ends_with(['E', 'e'])
            && !self.buffer.template.text[..self.buffer.template.text.len() - 1]
                .chars()
                .next_back()
                .is_some_and(is_ident_char);
        let rest = &self.src[self.pos + 1..];
        let mut chars = rest.char_indices();
        let mut end = self.src.len();
        while let Some((idx, c)) = chars.next() {
            if escapes && c == '\\' {
                chars.next();
            } else if c == quote {
                if rest[idx + 1..].starts_with(quote) {
                    chars.next();
                } else {
                    end = self.pos + 1 + idx + 1;
                    break;
                }
            }
        }
        self.take_until(end, true);
    }

    fn dollar(&mut self) {
        if self.buffer.ends_with_ident_char() {
            return self.take_char(true);
        }
        let rest = &self.src[self.pos + 1..];
        let Some(tag_len) = rest.find('$') else {
            return self.take_char(true);
        };
        let tag = &rest[..tag_len];
        let valid_tag = tag.chars().all(is_ident_char)
            && !tag.starts_with(|c: char| c.is_ascii_digit());
        if !valid_tag {
            return self.take_char(true);
        }
        let delimiter = format!("${tag}$");
        let body_start = self.pos + delimiter.len();
        let end = self.src[body_start..]
            .find(&delimiter)
            .map_or(self.src.len(), |idx| body_start + idx + delimiter.len());
        self.take_until(end, true);
    }

    fn line_comment(&mut self) {
        let end = self.src[self.pos..]
            .find('\n')
            .map_or(self.src.len(), |idx| self.pos + idx);
        self.take_until(end, false);
    }

    fn block_comment(&mut self) {
        let mut depth = 0usize;
        let mut idx = self.pos;
        let bytes = self.src.as_bytes();
        while idx < bytes.len() {
            if bytes[idx..].starts_with(b"/*") {
                depth += 1;
                idx += 2;
            } else if bytes[idx..].starts_with(b"*/") {
                depth -= 1;
                idx += 2;
                if depth == 0 {
                    break;
                }
            } else {
                idx += 1;
            }
        }
        self.take_until(idx.min(bytes.len()), false);
    }

    fn colon(&mut self) {
        if self.peek_at(1) == Some(':') {
            let end = self.pos + 2;
            return self.take_until(end, true);
        }
        match scan_variable(&self.src[self.pos..]) {
            Some((len, name, quoting)) => {
                self.buffer.template.push_var(name, quoting);
                self.buffer.has_content = true;
                self.pos += len;
            }
            None => self.take_char(true),
        }
    }

    fn meta(&mut self) -> Result<(), ScriptError> {
        let line = line_of(self.src, self.pos);
        let line_end = self.src[self.pos..]
            .find('\n')
            .map_or(self.src.len(), |idx| self.pos + idx);
        let directive = &self.src[self.pos + 1..line_end];
        let name_len = directive
            .find(char::is_whitespace)
            .unwrap_or(directive.len());
        let (name, args) = directive.split_at(name_len);
        if name.is_empty() {
            self.take_char(true);
            return Ok(());
        }
        self.pos = line_end;

        match name {
            "g" | "gset" => {
                let sql = self
                    .buffer
                    .take()
                    .or_else(|| self.last_sql.clone())
                    .ok_or_else(|| ScriptError::NothingToSend {
                        command: name.to_string(),
                        line,
                    })?;
                let gset = (name == "gset").then(|| {
                    lex_args(args)
                        .first()
                        .map(Template::source)
                        .unwrap_or_default()
                });
                self.send(sql, gset)
            }
            "r" | "reset" => {
                self.buffer = Buffer::default();
                Ok(())
            }
            "copy" => self.client_copy(args, line),
            _ => {
                let meta = parse_meta(name, args, line)?;
                self.commands.push(Command::Meta(meta));
                Ok(())
            }
        }
    }

    fn send(&mut self, sql: Template, gset: Option<String>) -> Result<(), ScriptError> {
        self.last_sql = Some(sql.clone());
        if sql.copy_direction() == Some(CopyDirection::FromStdin) {
            let data = self.copy_data()?;
            self.commands.push(Command::CopyIn { sql, data });
        } else {
            self.commands.push(Command::Sql { sql, gset });
        }
        Ok(())
    }

    /// Collect inline COPY data: every line after the current one up to `\.`
    fn copy_data(&mut self) -> Result<String, ScriptError> {
        let start_line = line_of(self.src, self.pos);
        let Some(newline) = self.src[self.pos..].find('\n') else {
            return Err(ScriptError::UnterminatedCopyData { line: start_line });
        };
        self.pos += newline + 1;

        let mut data = String::new();
        while self.pos < self.src.len() {
            let line_end = self.src[self.pos..]
                .find('\n')
                .map_or(self.src.len(), |idx| self.pos + idx);
            let line = self.src[self.pos..line_end].trim_end_matches('\r');
            self.pos = (line_end + 1).min(self.src.len());
            if line == "\\." {
                return Ok(data);
            }
            data.push_str(line);
            data.push('\n');
        }
        Err(ScriptError::UnterminatedCopyData { line: start_line })
    }

    /// `\copy table [(columns)] {from|to} {'file'|stdin|stdout} [options]`
    fn client_copy(&mut self, args: &str, line: usize) -> Result<(), ScriptError> {
        let Some((direction_at, direction)) = find_copy_direction(args) else {
            return Err(ScriptError::MissingArgument {
                command: "copy".to_string(),
                line,
            });
        };
        let target = args[..direction_at].trim();
        let after_keyword = args[direction_at + direction.len()..].trim_start();
        let file_len = after_keyword
            .find(char::is_whitespace)
            .unwrap_or(after_keyword.len());
        let (file, options) = after_keyword.split_at(file_len);
        let file_lower = file.to_ascii_lowercase();

        let unsupported = || {
            Command::Meta(MetaCommand::Unsupported {
                name: "copy".to_string(),
            })
        };
        match (direction.to_ascii_lowercase().as_str(), file_lower.as_str()) {
            ("from", "stdin" | "pstdin") => {
                let sql = Splitter::new(&format!("COPY {target} FROM STDIN{options}")).fragment();
                self.send(sql, None)
            }
            ("to", "stdout" | "pstdout") => {
                let sql = Splitter::new(&format!("COPY {target} TO STDOUT{options}")).fragment();
                self.send(sql, None)
            }
            ("from", "program") | ("to", _) => {
                self.commands.push(unsupported());
                Ok(())
            }
            ("from", _) => {
                let Some(path) = lex_args(file).into_iter().next() else {
                    return Err(ScriptError::MissingArgument {
                        command: "copy".to_string(),
                        line,
                    });
                };
                let sql = Splitter::new(&format!("COPY {target} FROM STDIN{options}")).fragment();
                self.commands.push(Command::CopyFile {
                    sql,
                    path: path.unquoted(),
                });
                Ok(())
            }
            _ => {
                self.commands.push(unsupported());
                Ok(())
            }
        }
    }
}

fn parse_meta(name: &str, args: &str, line: usize) -> Result<MetaCommand, ScriptError> {
    let mut args = lex_args(args).into_iter();
    let mut required = |args: &mut std::vec::IntoIter<Template>| {
        args.next().ok_or_else(|| ScriptError::MissingArgument {
            command: name.to_string(),
            line,
        })
    };

    let meta = match name {
        "set" => match args.next() {
            Some(variable) => MetaCommand::Set {
                name: variable,
                values: args.collect(),
            },
            None => MetaCommand::Ignored {
                name: name.to_string(),
            },
        },
        "unset" => MetaCommand::Unset {
            name: required(&mut args)?,
        },
        "getenv" => MetaCommand::GetEnv {
            variable: required(&mut args)?,
            env: required(&mut args)?,
        },
        "setenv" => MetaCommand::SetEnv {
            name: required(&mut args)?,
            value: args.next(),
        },
        "c" | "connect" => MetaCommand::Connect {
            database: args.next(),
            user: args.next(),
        },
        "if" => MetaCommand::If(required(&mut args)?),
        "elif" => MetaCommand::Elif(required(&mut args)?),
        "else" => MetaCommand::Else,
        "endif" => MetaCommand::Endif,
        "q" | "quit" => MetaCommand::Quit,
        name if IGNORED_COMMANDS.contains(&name) => MetaCommand::Ignored {
            name: name.to_string(),
        },
        name => MetaCommand::Unsupported {
            name: name.to_string(),
        },
    };
    Ok(meta)
}

/// Split meta-command arguments the way psql does: whitespace separated,
/// single quotes removed, variables interpolated.
fn lex_args(args: &str) -> Vec<Template> {
    let mut out = Vec::new();
    let mut rest = args;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return out;
        }
        let mut arg = TemplateBuilder::default();
        while let Some(c) = rest.chars().next() {
            if c.is_whitespace() {
                break;
            }
            match c {
                '\'' => {
                    let (text, consumed) = unquote_single(rest);
                    arg.push_str(&text);
                    rest = &rest[consumed..];
                }
                '"' => {
                    let end = rest[1..].find('"').map_or(rest.len(), |idx| idx + 2);
                    arg.push_str(&rest[..end]);
                    rest = &rest[end..];
                }
                ':' => match scan_variable(rest) {
                    Some((len, name, quoting)) => {
                        arg.push_var(name, quoting);
                        rest = &rest[len..];
                    }
                    None => {
                        arg.push_str(":");
                        rest = &rest[1..];
                    }
                },
                _ => {
                    arg.push_str(&rest[..c.len_utf8()]);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        out.push(arg.finish());
    }
}

/// Unquote a psql single-quoted argument; returns the text and the bytes consumed
fn unquote_single(s: &str) -> (String, usize) {
    let mut text = String::new();
    let mut chars = s.char_indices().skip(1).peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\'' => {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    text.push('\'');
                } else {
                    return (text, idx + 1);
                }
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, 'r')) => text.push('\r'),
                Some((_, other)) => text.push(other),
                None => text.push('\\'),
            },
            c => text.push(c),
        }
    }
    (text, s.len())
}

/// Recognise `:name`, `:'name'` or `:"name"` at the start of `s`
fn scan_variable(s: &str) -> Option<(usize, String, Quoting)> {
    let rest = s.strip_prefix(':')?;
    let mut chars = rest.chars();
    match chars.next()? {
        quote @ ('\'' | '"') => {
            let body = &rest[1..];
            let close = body.find(quote)?;
            let name = &body[..close];
            if name.is_empty() || !name.chars().all(is_ident_char) {
                return None;
            }
            let quoting = if quote == '\'' {
                Quoting::Literal
            } else {
                Quoting::Identifier
            };
            Some((close + 3, name.to_string(), quoting))
        }
        c if c.is_alphabetic() || c == '_' => {
            let len = rest
                .find(|c: char| !is_ident_char(c))
                .unwrap_or(rest.len());
            Some((len + 1, rest[..len].to_string(), Quoting::Raw))
        }
        _ => None,
    }
}

/// Position and spelling of the first top-level `from`/`to` keyword in
/// `\copy` arguments
fn find_copy_direction(args: &str) -> Option<(usize, &str)> {
    let mut depth = 0usize;
    let mut in_quote = None;
    let mut word_start = None;
    for (idx, c) in args.char_indices().chain(std::iter::once((args.len(), ' '))) {
        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if is_ident_char(c) {
            word_start.get_or_insert(idx);
            continue;
        }
        if let Some(start) = word_start.take() {
            let word = &args[start..idx];
            if depth == 0
                && (word.eq_ignore_ascii_case("from") || word.eq_ignore_ascii_case("to"))
            {
                return Some((start, word));
            }
        }
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Quote a value as a SQL string literal, using the `E''` form when it
/// contains backslashes
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if value.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

pub fn quote_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Upper-cased leading keywords, skipping whitespace and comments
fn leading_words(sql: &str, n: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = sql;
    while out.len() < n {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.find('\n').map_or("", |idx| &comment[idx..]);
            continue;
        }
        if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.find("*/").map_or("", |idx| &comment[idx + 2..]);
            continue;
        }
        let len = rest
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(rest.len());
        if len == 0 {
            break;
        }
        out.push(rest[..len].to_ascii_uppercase());
        rest = &rest[len..];
    }
    out
}

fn words(sql: &str) -> Vec<String> {
    sql.split(|c: char| !is_ident_char(c))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}

fn line_of(src: &str, offset: usize) -> usize {
    src[..offset.min(src.len())].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(commands: &[Command]) -> Vec<String> {
        commands
            .iter()
            .map(|c| match c {
                Command::Sql { sql, .. } => sql.source(),
                Command::CopyIn { sql, .. } => format!("copy-in {}", sql.source()),
                Command::CopyFile { sql, .. } => format!("copy-file {}", sql.source()),
                Command::Meta(meta) => format!("{meta:?}"),
            })
            .collect()
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_split_on_top_level_semicolons() {
        let commands = split("CREATE TABLE t (x int);\nINSERT INTO t VALUES (';');").unwrap();
        assert_eq!(
            sources(&commands),
            vec!["CREATE TABLE t (x int);", "INSERT INTO t VALUES (';');"]
        );
    }

    #[test]
    fn test_trailing_statement_without_semicolon() {
        let commands = split("SELECT 1").unwrap();
        assert_eq!(sources(&commands), vec!["SELECT 1"]);
    }

    #[test]
    fn test_comment_only_text_has_no_commands() {
        assert!(split("-- nothing here\n/* or /* here */ */\n").unwrap().is_empty());
    }

    #[test]
    fn test_dollar_quoted_body_is_opaque() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql;";
        assert_eq!(sources(&split(src).unwrap()), vec![src]);
    }

    #[test]
    fn test_semicolon_inside_parentheses() {
        let src = "CREATE RULE r AS ON INSERT TO t DO ALSO (INSERT INTO a VALUES (1); INSERT INTO b VALUES (2));";
        assert_eq!(split(src).unwrap().len(), 1);
    }

    #[test]
    fn test_variables_substituted_outside_quotes_only() {
        let commands = split("SELECT :x, ':x', :'x', :\"x\", 1::int, a[1:2];").unwrap();
        let Command::Sql { sql, .. } = &commands[0] else {
            panic!("expected sql");
        };
        assert_eq!(
            sql.render(&vars(&[("x", "it's")])),
            "SELECT it's, ':x', 'it''s', \"it's\", 1::int, a[1:2];"
        );
    }

    #[test]
    fn test_unknown_variable_kept_verbatim() {
        let commands = split("SELECT :missing, :'missing';").unwrap();
        let Command::Sql { sql, .. } = &commands[0] else {
            panic!("expected sql");
        };
        assert_eq!(sql.render(&vars(&[])), "SELECT :missing, :'missing';");
    }

    #[test]
    fn test_literal_with_backslash_uses_escape_string() {
        assert_eq!(quote_literal("a\\b"), "E'a\\\\b'");
        assert_eq!(quote_literal("plain"), "'plain'");
    }

    #[test]
    fn test_set_and_getenv() {
        let commands = split(
            "\\getenv abs_srcdir PG_ABS_SRCDIR\n\\set filename :abs_srcdir '/data/array.data'\nCOPY t FROM :'filename';",
        )
        .unwrap();
        assert_eq!(commands.len(), 3);
        let Command::Meta(MetaCommand::Set { name, values }) = &commands[1] else {
            panic!("expected \\set");
        };
        assert_eq!(name.source(), "filename");
        let rendered: String = values
            .iter()
            .map(|v| v.render(&vars(&[("abs_srcdir", "/src")])))
            .collect();
        assert_eq!(rendered, "/src/data/array.data");
        assert!(matches!(commands[2], Command::Sql { .. }));
    }

    #[test]
    fn test_gset_attaches_to_pending_query() {
        let commands =
            split("SELECT 1 AS one \\gset p_\nSELECT :p_one;").unwrap();
        assert_eq!(
            commands[0],
            Command::Sql {
                sql: Template::literal("SELECT 1 AS one"),
                gset: Some("p_".to_string()),
            }
        );
        assert_eq!(sources(&commands)[1], "SELECT :p_one;");
    }

    #[test]
    fn test_gset_without_query_fails() {
        assert_eq!(
            split("\\gset").unwrap_err(),
            ScriptError::NothingToSend {
                command: "gset".to_string(),
                line: 1,
            }
        );
    }

    #[test]
    fn test_copy_from_stdin_collects_data() {
        let commands = split("COPY t (a, b) FROM stdin;\n1\tone\n2\t\\N\n\\.\nSELECT 1;").unwrap();
        assert_eq!(
            commands[0],
            Command::CopyIn {
                sql: Template::literal("COPY t (a, b) FROM stdin;"),
                data: "1\tone\n2\t\\N\n".to_string(),
            }
        );
        assert_eq!(sources(&commands)[1], "SELECT 1;");
    }

    #[test]
    fn test_copy_without_terminator_fails() {
        assert_eq!(
            split("COPY t FROM stdin;\n1\n2").unwrap_err(),
            ScriptError::UnterminatedCopyData { line: 1 }
        );
    }

    #[test]
    fn test_client_copy_from_file() {
        let commands = split("\\copy onek FROM :'filename' WITH (FORMAT csv)").unwrap();
        let Command::CopyFile { sql, path } = &commands[0] else {
            panic!("expected \\copy from file");
        };
        assert_eq!(sql.source(), "COPY onek FROM STDIN WITH (FORMAT csv)");
        assert_eq!(path.render(&vars(&[("filename", "/d/onek.data")])), "/d/onek.data");
    }

    #[test]
    fn test_display_directives_are_ignored() {
        let commands = split("\\pset null '(null)'\n\\x\nSELECT 1;").unwrap();
        assert_eq!(
            commands[0],
            Command::Meta(MetaCommand::Ignored {
                name: "pset".to_string()
            })
        );
        assert_eq!(
            commands[1],
            Command::Meta(MetaCommand::Ignored {
                name: "x".to_string()
            })
        );
    }

    #[test]
    fn test_describe_is_unsupported() {
        let commands = split("\\d+ tbl").unwrap();
        assert_eq!(
            commands[0],
            Command::Meta(MetaCommand::Unsupported {
                name: "d+".to_string()
            })
        );
    }

    #[test]
    fn test_connect_arguments() {
        let commands = split("\\c - regress_user\nSELECT current_user;").unwrap();
        let Command::Meta(MetaCommand::Connect { database, user }) = &commands[0] else {
            panic!("expected \\c");
        };
        assert_eq!(database.as_ref().map(Template::source).as_deref(), Some("-"));
        assert_eq!(
            user.as_ref().map(Template::source).as_deref(),
            Some("regress_user")
        );
    }

    #[test]
    fn test_transaction_effects() {
        let effect = |sql: &str| Template::literal(sql).transaction_effect();
        assert_eq!(effect("BEGIN;"), Some(TransactionEffect::Begin));
        assert_eq!(effect("start transaction"), Some(TransactionEffect::Begin));
        assert_eq!(effect("-- c\nCOMMIT"), Some(TransactionEffect::End));
        assert_eq!(effect("ROLLBACK TO SAVEPOINT s"), None);
        assert_eq!(effect("ROLLBACK PREPARED 'x'"), None);
        assert_eq!(effect("savepoint s"), Some(TransactionEffect::Savepoint));
        assert_eq!(effect("RELEASE s"), Some(TransactionEffect::Release));
        assert_eq!(effect("SELECT 1"), None);
    }

    #[test]
    fn test_chained_transaction_end_keeps_depth() {
        let effect = |sql: &str| Template::literal(sql).transaction_effect();
        assert_eq!(effect("COMMIT AND CHAIN;"), None);
        assert_eq!(effect("rollback work and chain"), None);
        assert_eq!(effect("END TRANSACTION AND CHAIN"), None);
        assert_eq!(effect("COMMIT AND NO CHAIN"), Some(TransactionEffect::End));
        assert_eq!(effect("ABORT"), Some(TransactionEffect::End));
    }

    #[test]
    fn test_copy_direction() {
        let dir = |sql: &str| Template::literal(sql).copy_direction();
        assert_eq!(dir("COPY t FROM STDIN"), Some(CopyDirection::FromStdin));
        assert_eq!(dir("copy (select 1) to stdout"), Some(CopyDirection::ToStdout));
        assert_eq!(dir("COPY t FROM '/tmp/x'"), None);
        assert_eq!(dir("SELECT 'COPY FROM STDIN'"), None);
    }
}
