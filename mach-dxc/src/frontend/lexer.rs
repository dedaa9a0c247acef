use crate::diagnostic::Location;
use crate::logger::DiagnosticLog;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident,
    Int(u64),
    Float(f64),
    Str(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Spelling as written.
    pub text: String,
    pub loc: Location,
    /// First token on its line, which is where directives are recognized.
    pub line_start: bool,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }

    pub fn eof(loc: Location) -> Token {
        Token {
            kind: TokenKind::Eof,
            text: String::new(),
            loc,
            line_start: true,
        }
    }
}

// Longest first.
const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "...", "::", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "++", "--", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "->", "##", "(", ")", "{", "}", "[", "]", ";", ",",
    ":", "?", ".", "+", "-", "*", "/", "%", "&", "|", "^", "~", "!", "=", "<", ">", "#",
];

struct Lexer<'a, 'd> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    line_begin: usize,
    file: &'a Arc<str>,
    diags: &'d mut DiagnosticLog,
    at_line_start: bool,
}

/// Splits one file into tokens. Comments and line continuations are dropped.
pub fn tokenize(text: &str, file: &Arc<str>, diags: &mut DiagnosticLog) -> Vec<Token> {
    let mut lexer = Lexer {
        src: text.as_bytes(),
        pos: 0,
        line: 1,
        line_begin: 0,
        file,
        diags,
        at_line_start: true,
    };

    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token() {
        tokens.push(token);
    }
    tokens
}

impl<'a, 'd> Lexer<'a, 'd> {
    fn peek(&self, offset: usize) -> u8 {
        self.src.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn location(&self) -> Location {
        Location::new(self.file, self.line, (self.pos - self.line_begin) as u32 + 1)
    }

    fn newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.line_begin = self.pos;
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek(0) {
                b'\n' => {
                    self.newline();
                    self.at_line_start = true;
                }
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c if self.pos < self.src.len() => self.pos += 1,
                b'\\' if self.peek(1) == b'\n' => {
                    self.pos += 1;
                    self.newline();
                }
                b'\\' if self.peek(1) == b'\r' && self.peek(2) == b'\n' => {
                    self.pos += 2;
                    self.newline();
                }
                b'/' if self.peek(1) == b'/' => {
                    while self.pos < self.src.len() && self.peek(0) != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.peek(1) == b'*' => {
                    let start = self.location();
                    self.pos += 2;
                    loop {
                        if self.pos >= self.src.len() {
                            self.diags.error(&start, "unterminated /* comment");
                            return;
                        }
                        if self.peek(0) == b'*' && self.peek(1) == b'/' {
                            self.pos += 2;
                            break;
                        }
                        if self.peek(0) == b'\n' {
                            self.newline();
                        } else {
                            self.pos += 1;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        loop {
            self.skip_trivia();
            if self.pos >= self.src.len() {
                return None;
            }

            let loc = self.location();
            let start = self.pos;
            let c = self.peek(0);

            let kind = if c.is_ascii_alphabetic() || c == b'_' {
                while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == b'_' {
                    self.pos += 1;
                }
                TokenKind::Ident
            } else if c.is_ascii_digit() || (c == b'.' && self.peek(1).is_ascii_digit()) {
                match self.number(&loc) {
                    Some(kind) => kind,
                    None => continue,
                }
            } else if c == b'"' {
                match self.string(&loc) {
                    Some(kind) => kind,
                    None => continue,
                }
            } else if let Some(&p) = PUNCTUATORS
                .iter()
                .find(|p| self.src[self.pos..].starts_with(p.as_bytes()))
            {
                self.pos += p.len();
                TokenKind::Punct(p)
            } else {
                let rest = std::str::from_utf8(&self.src[self.pos..]).unwrap_or_default();
                let ch = rest.chars().next().unwrap_or(c as char);
                self.diags
                    .error(&loc, format!("invalid character '{}' in source", ch.escape_default()));
                self.pos += ch.len_utf8().max(1);
                continue;
            };

            let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
            let line_start = std::mem::replace(&mut self.at_line_start, false);

            return Some(Token {
                kind,
                text,
                loc,
                line_start,
            });
        }
    }

    fn number(&mut self, loc: &Location) -> Option<TokenKind> {
        let start = self.pos;

        if self.peek(0) == b'0' && matches!(self.peek(1), b'x' | b'X') {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek(0).is_ascii_hexdigit() {
                self.pos += 1;
            }
            let digits = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap_or("");
            let value = u64::from_str_radix(digits, 16);
            self.integer_suffix(loc)?;
            return match value {
                Ok(value) => Some(TokenKind::Int(value)),
                Err(_) => {
                    self.diags.error(loc, "invalid hexadecimal constant");
                    None
                }
            };
        }

        let mut is_float = false;
        while self.peek(0).is_ascii_digit() {
            self.pos += 1;
        }
        if self.peek(0) == b'.' {
            is_float = true;
            self.pos += 1;
            while self.peek(0).is_ascii_digit() {
                self.pos += 1;
            }
        }
        if matches!(self.peek(0), b'e' | b'E')
            && (self.peek(1).is_ascii_digit()
                || (matches!(self.peek(1), b'+' | b'-') && self.peek(2).is_ascii_digit()))
        {
            is_float = true;
            self.pos += 2;
            while self.peek(0).is_ascii_digit() {
                self.pos += 1;
            }
        }

        let literal = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("0");

        if is_float {
            if matches!(self.peek(0), b'f' | b'F' | b'h' | b'H' | b'l' | b'L') {
                self.pos += 1;
            }
            self.reject_trailing_identifier(loc, "floating")?;
            return Some(TokenKind::Float(literal.parse().unwrap_or(0.0)));
        }

        let value = if literal.len() > 1 && literal.starts_with('0') {
            u64::from_str_radix(&literal[1..], 8)
        } else {
            literal.parse::<u64>()
        };
        self.integer_suffix(loc)?;

        match value {
            Ok(value) => Some(TokenKind::Int(value)),
            Err(_) => {
                self.diags.error(loc, format!("invalid integer constant '{literal}'"));
                None
            }
        }
    }

    fn integer_suffix(&mut self, loc: &Location) -> Option<()> {
        while matches!(self.peek(0), b'u' | b'U' | b'l' | b'L') {
            self.pos += 1;
        }
        self.reject_trailing_identifier(loc, "integer")
    }

    fn reject_trailing_identifier(&mut self, loc: &Location, what: &str) -> Option<()> {
        let suffix_start = self.pos;
        while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == b'_' {
            self.pos += 1;
        }
        if self.pos == suffix_start {
            return Some(());
        }
        let suffix = String::from_utf8_lossy(&self.src[suffix_start..self.pos]);
        self.diags
            .error(loc, format!("invalid suffix '{suffix}' on {what} constant"));
        None
    }

    fn string(&mut self, loc: &Location) -> Option<TokenKind> {
        self.pos += 1;
        let mut value = Vec::new();
        loop {
            match self.peek(0) {
                b'"' => {
                    self.pos += 1;
                    return Some(TokenKind::Str(String::from_utf8_lossy(&value).into_owned()));
                }
                b'\\' if self.pos + 1 < self.src.len() && self.peek(1) != b'\n' => {
                    value.push(match self.peek(1) {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'0' => 0,
                        other => other,
                    });
                    self.pos += 2;
                }
                b'\n' => break,
                _ if self.pos >= self.src.len() => break,
                other => {
                    value.push(other);
                    self.pos += 1;
                }
            }
        }
        self.diags.error(loc, "missing terminating '\"' character");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> (Vec<Token>, DiagnosticLog) {
        let mut diags = DiagnosticLog::new();
        let file: Arc<str> = Arc::from("test.hlsl");
        let tokens = tokenize(text, &file, &mut diags);
        (tokens, diags)
    }

    #[test]
    fn lexes_declaration() {
        let (tokens, diags) = lex("float4 main() : SV_TARGET { return 1.5f; }");
        assert!(diags.is_empty());
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            ["float4", "main", "(", ")", ":", "SV_TARGET", "{", "return", "1.5f", ";", "}"]
        );
        assert_eq!(tokens[8].kind, TokenKind::Float(1.5));
        assert_eq!(tokens[10].loc.column, 42);
    }

    #[test]
    fn tracks_line_starts_across_comments() {
        let (tokens, _) = lex("a /* one\n two */ b\n// c\n  #d");
        assert!(tokens[0].line_start);
        assert!(!tokens[1].line_start);
        assert_eq!(tokens[1].loc.line, 2);
        assert!(tokens[2].line_start && tokens[2].is_punct("#"));
        assert_eq!(tokens[2].loc.line, 4);
    }

    #[test]
    fn continuation_joins_lines() {
        let (tokens, _) = lex("#define X \\\n 1\nY");
        assert!(!tokens[3].line_start);
        assert_eq!(tokens[3].kind, TokenKind::Int(1));
        assert!(tokens[4].line_start);
    }

    #[test]
    fn numbers() {
        let (tokens, diags) = lex("0x1F 010 7u .5 1e3 2.h");
        assert!(diags.is_empty());
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [
                TokenKind::Int(31),
                TokenKind::Int(8),
                TokenKind::Int(7),
                TokenKind::Float(0.5),
                TokenKind::Float(1000.0),
                TokenKind::Float(2.0)
            ]
        );
    }

    #[test]
    fn reports_bad_input() {
        let (_, diags) = lex("int x = 3q; \"open\n$");
        let text = diags.finish().unwrap();
        assert!(text.as_str().contains("invalid suffix 'q' on integer constant"));
        assert!(text.as_str().contains("missing terminating '\"' character"));
        assert!(text.as_str().contains("invalid character '$' in source"));
    }
}
