use crate::parser::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    Let,
    Const,
    Var,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Typeof,
    True,
    False,
    Null,
    Undefined,
    This,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        let keyword = match ident {
            "let" => Keyword::Let,
            "const" => Keyword::Const,
            "var" => Keyword::Var,
            "function" => Keyword::Function,
            "return" => Keyword::Return,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "do" => Keyword::Do,
            "for" => Keyword::For,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "throw" => Keyword::Throw,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "finally" => Keyword::Finally,
            "new" => Keyword::New,
            "typeof" => Keyword::Typeof,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            "undefined" => Keyword::Undefined,
            "this" => Keyword::This,
            _ => return None,
        };
        Some(keyword)
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Keyword::Let => "let",
            Keyword::Const => "const",
            Keyword::Var => "var",
            Keyword::Function => "function",
            Keyword::Return => "return",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Do => "do",
            Keyword::For => "for",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Throw => "throw",
            Keyword::Try => "try",
            Keyword::Catch => "catch",
            Keyword::Finally => "finally",
            Keyword::New => "new",
            Keyword::Typeof => "typeof",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
            Keyword::Undefined => "undefined",
            Keyword::This => "this",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Keyword(Keyword),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

// Longest first, so that "===" wins over "==" and "="
const PUNCTUATORS: [&str; 36] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=", "%=",
    "{", "}", "(", ")", "[", "]", ";", ",", ".", "?", ":", "=", "+", "-", "*", "/", "%", "<",
    ">", "!", "~",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    offset: usize,
    line: u32,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            offset: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(ch) = self.current() {
            match ch {
                '\n' => {
                    self.line += 1;
                    self.bump();
                }
                '/' if self.peek() == Some('/') => self.eat_line_comment(),
                '/' if self.peek() == Some('*') => self.eat_block_comment()?,
                ch if ch.is_whitespace() => self.bump(),
                ch if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' => self.lex_identifier(),
                ch if ch.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
                '"' | '\'' => self.lex_string(ch)?,
                _ => self.lex_punct()?,
            }
        }
        self.push(TokenKind::Eof);
        Ok(self.tokens)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.offset..]
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) {
        if let Some(ch) = self.current() {
            self.offset += ch.len_utf8();
        }
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.line,
        }
    }

    fn eat_line_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn eat_block_comment(&mut self) -> Result<(), ParseError> {
        self.bump();
        self.bump();
        while let Some(ch) = self.current() {
            if ch == '*' && self.peek() == Some('/') {
                self.bump();
                self.bump();
                return Ok(());
            }
            if ch == '\n' {
                self.line += 1;
            }
            self.bump();
        }
        Err(self.error("Unterminated comment"))
    }

    fn lex_identifier(&mut self) {
        let start = self.offset;
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                self.bump();
            } else {
                break;
            }
        }
        let ident = &self.src[start..self.offset];
        let kind = match Keyword::from_ident(ident) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(ident.to_string()),
        };
        self.push(kind);
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let start = self.offset;
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(ch) = self.current() {
            match ch {
                '0'..='9' => self.bump(),
                '.' if !seen_dot && !seen_exp => {
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' if !seen_exp => {
                    seen_exp = true;
                    self.bump();
                    if matches!(self.current(), Some('+' | '-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        if self.current().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(self.error("Invalid or unexpected token"));
        }

        let text = &self.src[start..self.offset];
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("Invalid number literal '{text}'")))?;
        self.push(TokenKind::Number(value));
        Ok(())
    }

    fn lex_string(&mut self, quote: char) -> Result<(), ParseError> {
        self.bump();
        let mut value = String::new();
        loop {
            let Some(ch) = self.current() else {
                return Err(self.error("Invalid or unexpected token"));
            };
            self.bump();
            match ch {
                ch if ch == quote => break,
                '\n' => return Err(self.error("Invalid or unexpected token")),
                '\\' => {
                    let Some(escaped) = self.current() else {
                        return Err(self.error("Invalid or unexpected token"));
                    };
                    self.bump();
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        'u' => value.push(self.lex_unicode_escape()?),
                        '\n' => self.line += 1,
                        other => value.push(other),
                    }
                }
                other => value.push(other),
            }
        }
        self.push(TokenKind::Str(value));
        Ok(())
    }

    fn lex_unicode_escape(&mut self) -> Result<char, ParseError> {
        let digits = self.rest().get(..4).unwrap_or_default();
        let code = u32::from_str_radix(digits, 16)
            .ok()
            .filter(|_| digits.len() == 4)
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("Invalid Unicode escape sequence"))?;
        self.offset += 4;
        Ok(code)
    }

    fn lex_punct(&mut self) -> Result<(), ParseError> {
        let rest = self.rest();
        let Some(punct) = PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) else {
            let ch = self.current().unwrap_or_default();
            return Err(self.error(format!("Invalid or unexpected token '{ch}'")));
        };
        self.offset += punct.len();
        self.push(TokenKind::Punct(*punct));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn test_longest_punctuator_wins() {
        assert_eq!(
            kinds("a === b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("==="),
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_numbers() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" 1.5e2 .5"#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\nb".into()),
                TokenKind::Number(150.0),
                TokenKind::Number(0.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lines_are_tracked() {
        let tokens = tokenize("a\n/* x\n y */ b // c\nthrow").unwrap();
        let lines: Vec<u32> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 3, 4, 4]);
        assert_eq!(tokens[2].kind, TokenKind::Keyword(Keyword::Throw));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
