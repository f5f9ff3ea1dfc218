use logos::{Lexer, Logos};
use miette::{Diagnostic, SourceSpan};
use std::fmt;

/// Extract block content between braces, handling nested braces.
/// Content is returned verbatim; the parser dedents it.
fn extract_block_content(lexer: &mut Lexer<'_, Token>) -> Option<String> {
    let remainder = lexer.remainder();
    let mut depth = 1;

    for (idx, ch) in remainder.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let content = remainder[..idx].to_string();
                    lexer.bump(idx + 1);
                    return Some(content);
                }
            }
            _ => {}
        }
    }

    None
}

/// Token types for the `.regress` fixture format
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
pub enum Token {
    #[token("@fixture")]
    AtFixture,

    #[token("@depends-on")]
    AtDependsOn,

    #[token("@skip-fixture")]
    AtSkipFixture,

    #[token("@skip")]
    AtSkip,

    #[token("statement")]
    Statement,

    #[token("expect")]
    Expect,

    #[token("error")]
    Error,

    #[token("contains")]
    Contains,

    #[token("pattern")]
    Pattern,

    #[token("unordered")]
    Unordered,

    /// `{` followed by content until matching `}`
    #[token("{", extract_block_content)]
    BlockContent(String),

    /// A fixture name
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.-]*", |lex| lex.slice().to_string())]
    Identifier(String),

    /// A quoted string
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        s[1..s.len()-1].replace("\\\"", "\"")
    })]
    String(String),

    #[regex(r"#[^\n]*", |lex| lex.slice()[1..].trim().to_string(), allow_greedy = true)]
    Comment(String),

    #[token("\n")]
    Newline,
}

impl Token {
    /// Keywords double as fixture names when they appear in name position
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Token::Identifier(name) => Some(name),
            Token::Statement => Some("statement"),
            Token::Expect => Some("expect"),
            Token::Error => Some("error"),
            Token::Contains => Some("contains"),
            Token::Pattern => Some("pattern"),
            Token::Unordered => Some("unordered"),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::AtFixture => write!(f, "@fixture"),
            Token::AtDependsOn => write!(f, "@depends-on"),
            Token::AtSkipFixture => write!(f, "@skip-fixture"),
            Token::AtSkip => write!(f, "@skip"),
            Token::Statement => write!(f, "statement"),
            Token::Expect => write!(f, "expect"),
            Token::Error => write!(f, "error"),
            Token::Contains => write!(f, "contains"),
            Token::Pattern => write!(f, "pattern"),
            Token::Unordered => write!(f, "unordered"),
            Token::BlockContent(_) => write!(f, "{{...}}"),
            Token::Identifier(s) => write!(f, "{s}"),
            Token::String(s) => write!(f, "\"{s}\""),
            Token::Comment(s) => write!(f, "# {s}"),
            Token::Newline => write!(f, "\\n"),
        }
    }
}

/// A token with its span in the source
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: std::ops::Range<usize>,
}

/// Tokenize input and collect all tokens with their spans
pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, LexerError> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => {
                tokens.push(SpannedToken {
                    token,
                    span: lexer.span(),
                });
            }
            Err(()) => {
                let span = lexer.span();
                let slice = input[span.clone()].to_string();
                let help = suggest_fix(&slice);
                return Err(LexerError::InvalidToken {
                    span: SourceSpan::new(span.start.into(), span.len()),
                    slice,
                    help,
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(slice: &str) -> Option<String> {
    if slice.starts_with('@') {
        Some("valid directives are @fixture, @depends-on, @skip-fixture and @skip".to_string())
    } else if slice.starts_with('{') {
        Some("block is not closed; braces inside a block must be balanced".to_string())
    } else {
        None
    }
}

/// Calculate line and column from a byte offset
pub fn line_col(input: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;

    for (i, ch) in input.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

#[derive(Debug, Clone, thiserror::Error, Diagnostic)]
pub enum LexerError {
    #[error("invalid token '{slice}'")]
    #[diagnostic(code(regress::lexer::invalid_token))]
    InvalidToken {
        #[label("unrecognized token")]
        span: SourceSpan,
        slice: String,
        #[help]
        help: Option<String>,
    },
}
