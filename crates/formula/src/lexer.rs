//! Tokenizer for formula expressions

use jellyfish_core::{Error, Result};

/// A lexical token with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token kind and payload
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub offset: usize,
}

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Numeric literal
    Number(f64),
    /// Quoted string literal, escapes resolved
    Str(String),
    /// Bare identifier
    Ident(String),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `&`
    Amp,
    /// `=` (also accepts `==`)
    Eq,
    /// `<>` (also accepts `!=`)
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// End of input
    End,
}

fn error_at(offset: usize, msg: impl std::fmt::Display) -> Error {
    Error::invalid_expression(format!("{} at offset {}", msg, offset))
}

/// Split an expression into tokens, always ending with [`TokenKind::End`]
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let peek = chars.get(i + 1).map(|&(_, c)| c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (kind, width) = match c {
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            '[' => (TokenKind::LBracket, 1),
            ']' => (TokenKind::RBracket, 1),
            ',' => (TokenKind::Comma, 1),
            '+' => (TokenKind::Plus, 1),
            '-' => (TokenKind::Minus, 1),
            '*' => (TokenKind::Star, 1),
            '/' => (TokenKind::Slash, 1),
            '&' => (TokenKind::Amp, 1),
            '=' if peek == Some('=') => (TokenKind::Eq, 2),
            '=' => (TokenKind::Eq, 1),
            '!' if peek == Some('=') => (TokenKind::Ne, 2),
            '<' if peek == Some('>') => (TokenKind::Ne, 2),
            '<' if peek == Some('=') => (TokenKind::Le, 2),
            '<' => (TokenKind::Lt, 1),
            '>' if peek == Some('=') => (TokenKind::Ge, 2),
            '>' => (TokenKind::Gt, 1),
            '.' if !peek.map_or(false, |p| p.is_ascii_digit()) => (TokenKind::Dot, 1),
            '\'' | '"' => {
                let (text, width) = lex_string(&chars[i..], c)?;
                (TokenKind::Str(text), width)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
                    .count();
                let end = chars.get(i + width).map_or(source.len(), |&(o, _)| o);
                let literal = &source[offset..end];
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| error_at(offset, format!("malformed number '{}'", literal)))?;
                (TokenKind::Number(number), width)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
                    .count();
                let ident: String = chars[i..i + width].iter().map(|&(_, c)| c).collect();
                (TokenKind::Ident(ident), width)
            }
            other => return Err(error_at(offset, format!("unexpected character '{}'", other))),
        };

        tokens.push(Token { kind, offset });
        i += width;
    }

    tokens.push(Token {
        kind: TokenKind::End,
        offset: source.len(),
    });
    Ok(tokens)
}

/// Lex a quoted string starting at `chars[0]`; returns the text and the
/// number of chars consumed including both quotes.
fn lex_string(chars: &[(usize, char)], quote: char) -> Result<(String, usize)> {
    let start = chars[0].0;
    let mut text = String::new();
    let mut i = 1;

    while let Some(&(offset, c)) = chars.get(i) {
        match c {
            c if c == quote => return Ok((text, i + 1)),
            '\\' => {
                let Some(&(_, escaped)) = chars.get(i + 1) else {
                    return Err(error_at(offset, "dangling escape"));
                };
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(error_at(start, "unterminated string"))
}
