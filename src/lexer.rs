use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};

pub struct Lexer<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    line: u32,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            line: 1,
            diagnostics: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            // Identifiers and keywords; '@' starts the self/parent references
            if is_ident_start(ch) || ch == b'@' {
                return self.scan_ident_or_keyword();
            }

            // Numeric literals
            if ch.is_ascii_digit() {
                return self.scan_number();
            }

            if ch == b'\'' {
                return self.scan_char();
            }

            if ch == b'"' {
                return self.scan_string();
            }

            // Symbols
            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None: error was recorded, keep scanning
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                if self.source[self.pos] == b'\n' {
                    self.line += 1;
                }
                self.pos += 1;
            }

            if self.pos < self.source.len() && self.source[self.pos] == b'#' {
                // Block comment: #~ ... ~#
                if self.pos + 1 < self.source.len() && self.source[self.pos + 1] == b'~' {
                    let start = self.pos;
                    self.pos += 2;
                    let mut closed = false;
                    while self.pos + 1 < self.source.len() {
                        if self.source[self.pos] == b'\n' {
                            self.line += 1;
                        }
                        if self.source[self.pos] == b'~' && self.source[self.pos + 1] == b'#' {
                            self.pos += 2;
                            closed = true;
                            break;
                        }
                        self.pos += 1;
                    }
                    if !closed {
                        self.pos = self.source.len();
                        self.diagnostics.push(Diagnostic::error(
                            "unterminated block comment".to_string(),
                            Span::new(self.file_id, self.line, start as u32, self.pos as u32),
                        ));
                    }
                } else {
                    // Line comment
                    while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                continue;
            }

            break;
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        if self.source[self.pos] == b'@' {
            self.pos += 1;
        }
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("");
        let token = Lexeme::from_keyword(text).unwrap_or_else(|| Lexeme::Ident(text.to_string()));
        self.make_token(token, start, self.pos)
    }

    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }

        // Fractional part: a '.' must be followed by a digit so that method
        // chains on integer literals still lex (e.g. `255.ToChar()` is not a float)
        let mut is_float = false;
        if self.pos + 1 < self.source.len()
            && self.source[self.pos] == b'.'
            && self.source[self.pos + 1].is_ascii_digit()
        {
            is_float = true;
            self.pos += 1;
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }

        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("0");

        // Suffixes: 'f' forces Float, 'b' forces Byte
        if self.pos < self.source.len() && self.source[self.pos] == b'f' {
            self.pos += 1;
            let value = text.parse::<f64>().unwrap_or(0.0);
            return self.make_token(Lexeme::FloatLit(value), start, self.pos);
        }
        if !is_float && self.pos < self.source.len() && self.source[self.pos] == b'b' {
            self.pos += 1;
            match text.parse::<u8>() {
                Ok(value) => return self.make_token(Lexeme::ByteLit(value), start, self.pos),
                Err(_) => {
                    self.diagnostics.push(Diagnostic::error(
                        format!("byte literal '{}' is out of range", text),
                        Span::new(self.file_id, self.line, start as u32, self.pos as u32),
                    ));
                    return self.make_token(Lexeme::ByteLit(0), start, self.pos);
                }
            }
        }

        if is_float {
            let value = text.parse::<f64>().unwrap_or(0.0);
            return self.make_token(Lexeme::FloatLit(value), start, self.pos);
        }

        match text.parse::<i32>() {
            Ok(value) => self.make_token(Lexeme::IntLit(value), start, self.pos),
            Err(_) => {
                self.diagnostics.push(Diagnostic::error(
                    format!("integer literal '{}' is too large", text),
                    Span::new(self.file_id, self.line, start as u32, self.pos as u32),
                ));
                self.make_token(Lexeme::IntLit(0), start, self.pos)
            }
        }
    }

    fn scan_char(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        self.pos += 1; // opening quote

        let value = match self.source.get(self.pos) {
            Some(b'\\') => {
                self.pos += 1;
                let escaped = self.source.get(self.pos).copied().unwrap_or(b'\\');
                self.pos += 1;
                unescape(escaped)
            }
            Some(&byte) => {
                // Multi-byte UTF-8 character
                let rest = std::str::from_utf8(&self.source[self.pos..]).unwrap_or("");
                let ch = rest.chars().next().unwrap_or('\0');
                self.pos += ch.len_utf8();
                let _ = byte;
                ch
            }
            None => '\0',
        };

        if self.source.get(self.pos) == Some(&b'\'') {
            self.pos += 1;
        } else {
            self.diagnostics.push(Diagnostic::error(
                "unterminated character literal".to_string(),
                Span::new(self.file_id, self.line, start as u32, self.pos as u32),
            ));
        }
        self.make_token(Lexeme::CharLit(value), start, self.pos)
    }

    /// Scans a string literal. Interpolation segments (`{$name}`) stay in the
    /// raw text; the analyzer splits them.
    fn scan_string(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        self.pos += 1; // opening quote

        let mut value = String::new();
        let mut closed = false;
        while self.pos < self.source.len() {
            match self.source[self.pos] {
                b'"' => {
                    self.pos += 1;
                    closed = true;
                    break;
                }
                b'\\' => {
                    self.pos += 1;
                    let escaped = self.source.get(self.pos).copied().unwrap_or(b'\\');
                    self.pos += 1;
                    value.push(unescape(escaped));
                }
                b'\n' => {
                    self.line += 1;
                    value.push('\n');
                    self.pos += 1;
                }
                byte if byte < 0x80 => {
                    value.push(byte as char);
                    self.pos += 1;
                }
                _ => {
                    let rest = std::str::from_utf8(&self.source[self.pos..]).unwrap_or("");
                    let ch = rest.chars().next().unwrap_or('\u{FFFD}');
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }

        if !closed {
            self.diagnostics.push(Diagnostic::error(
                "unterminated string literal".to_string(),
                Span::new(self.file_id, self.line, start as u32, self.pos as u32),
            ));
        }
        self.make_token(Lexeme::StringLit(value), start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        let next = self.source.get(self.pos + 1).copied();

        let (token, len) = match (ch, next) {
            (b':', Some(b'=')) => (Lexeme::Assign, 2),
            (b'+', Some(b'=')) => (Lexeme::AddAssign, 2),
            (b'-', Some(b'=')) => (Lexeme::SubAssign, 2),
            (b'*', Some(b'=')) => (Lexeme::MulAssign, 2),
            (b'/', Some(b'=')) => (Lexeme::DivAssign, 2),
            (b'-', Some(b'>')) => (Lexeme::Assessor, 2),
            (b'<', Some(b'>')) => (Lexeme::Neql, 2),
            (b'<', Some(b'=')) => (Lexeme::LesEql, 2),
            (b'>', Some(b'=')) => (Lexeme::GtrEql, 2),
            (b'<', Some(b'<')) => (Lexeme::Shl, 2),
            (b'>', Some(b'>')) => (Lexeme::Shr, 2),
            (b'=', _) => (Lexeme::Eql, 1),
            (b'<', _) => (Lexeme::Les, 1),
            (b'>', _) => (Lexeme::Gtr, 1),
            (b'+', _) => (Lexeme::Add, 1),
            (b'-', _) => (Lexeme::Sub, 1),
            (b'*', _) => (Lexeme::Mul, 1),
            (b'/', _) => (Lexeme::Div, 1),
            (b'%', _) => (Lexeme::Mod, 1),
            (b'&', _) => (Lexeme::And, 1),
            (b'|', _) => (Lexeme::Or, 1),
            (b'?', _) => (Lexeme::Question, 1),
            (b'(', _) => (Lexeme::LParen, 1),
            (b')', _) => (Lexeme::RParen, 1),
            (b'{', _) => (Lexeme::LBrace, 1),
            (b'}', _) => (Lexeme::RBrace, 1),
            (b'[', _) => (Lexeme::LBracket, 1),
            (b']', _) => (Lexeme::RBracket, 1),
            (b',', _) => (Lexeme::Comma, 1),
            (b';', _) => (Lexeme::Semicolon, 1),
            (b':', _) => (Lexeme::Colon, 1),
            (b'.', _) => (Lexeme::Dot, 1),
            (b'~', _) => (Lexeme::Tilde, 1),
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    format!("unexpected character '{}'", ch as char),
                    Span::new(self.file_id, self.line, start as u32, start as u32 + 1),
                ));
                self.pos += 1;
                return None;
            }
        };

        self.pos += len;
        Some(self.make_token(token, start, self.pos))
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(
            token,
            Span::new(self.file_id, self.line, start as u32, end as u32),
        )
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_' || ch == b'$'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn unescape(byte: u8) -> char {
    match byte {
        b'n' => '\n',
        b't' => '\t',
        b'r' => '\r',
        b'0' => '\0',
        b'\'' => '\'',
        b'"' => '"',
        b'\\' => '\\',
        other => other as char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Lexeme> {
        let (tokens, errors) = Lexer::new(source, 0).tokenize();
        assert!(errors.is_empty(), "unexpected lex errors: {:?}", errors);
        tokens.into_iter().map(|t| t.node).collect()
    }

    #[test]
    fn test_keywords_and_symbols() {
        let tokens = lex("class Hello from Base { x : Int := 0; }");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Class,
                Lexeme::Ident("Hello".to_string()),
                Lexeme::From,
                Lexeme::Ident("Base".to_string()),
                Lexeme::LBrace,
                Lexeme::Ident("x".to_string()),
                Lexeme::Colon,
                Lexeme::IntTy,
                Lexeme::Assign,
                Lexeme::IntLit(0),
                Lexeme::Semicolon,
                Lexeme::RBrace,
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_numeric_literals() {
        let tokens = lex("42 42b 1.5 2f");
        assert_eq!(
            tokens,
            vec![
                Lexeme::IntLit(42),
                Lexeme::ByteLit(42),
                Lexeme::FloatLit(1.5),
                Lexeme::FloatLit(2.0),
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_assessor_vs_minus() {
        let tokens = lex("a->b - c");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Ident("a".to_string()),
                Lexeme::Assessor,
                Lexeme::Ident("b".to_string()),
                Lexeme::Sub,
                Lexeme::Ident("c".to_string()),
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_self_reference_identifier() {
        let tokens = lex("@self->x");
        assert_eq!(tokens[0], Lexeme::Ident("@self".to_string()));
    }

    #[test]
    fn test_string_with_interpolation_stays_raw() {
        let tokens = lex(r#""count is {$n}!""#);
        assert_eq!(tokens[0], Lexeme::StringLit("count is {$n}!".to_string()));
    }

    #[test]
    fn test_char_escapes() {
        let tokens = lex(r"'\n' '\\'");
        assert_eq!(tokens[0], Lexeme::CharLit('\n'));
        assert_eq!(tokens[1], Lexeme::CharLit('\\'));
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = lex("x # trailing comment\n #~ block\n comment ~# y");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Ident("x".to_string()),
                Lexeme::Ident("y".to_string()),
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_line_numbers_advance() {
        let (tokens, _) = Lexer::new("a\nb\n\nc", 0).tokenize();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[2].span.line, 4);
    }

    #[test]
    fn test_unterminated_string_reports_error() {
        let (_, errors) = Lexer::new("\"oops", 0).tokenize();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated"));
    }

    #[test]
    fn test_compound_comparison_operators() {
        let tokens = lex("a <> b <= c >= d << e >> f");
        assert!(tokens.contains(&Lexeme::Neql));
        assert!(tokens.contains(&Lexeme::LesEql));
        assert!(tokens.contains(&Lexeme::GtrEql));
        assert!(tokens.contains(&Lexeme::Shl));
        assert!(tokens.contains(&Lexeme::Shr));
    }
}
