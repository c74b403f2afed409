//! Hand-written tokenizer over UTF-8 source.
//!
//! One-char lookahead; line/column counters update per consumed char so
//! every token carries an exact source position for diagnostics.

use std::rc::Rc;

use ra_core::Number;

use crate::error::ParseError;
use crate::token::{BuiltinType, Keyword, Operator, Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,   // 1-based
    column: usize, // 0-based offset within the line
    file: String,
    lines: Vec<Rc<str>>,
}

fn keyword_for(ident: &str) -> Option<Keyword> {
    use Keyword::*;
    Some(match ident {
        "if" => If,
        "else" => Else,
        "elif" => Elif,
        "then" => Then,
        "do" => Do,
        "in" => In,
        "var" => Var,
        "const" => Const,
        "enum" => Enum,
        "for" => For,
        "while" => While,
        "each" => Each,
        "where" => Where,
        "def" => Def,
        "class" => Class,
        "struct" => Struct,
        "static" => Static,
        "virtual" => Virtual,
        "new" => New,
        "return" => Return,
        "refer" => Refer,
        "break" => Break,
        "continue" => Continue,
        "throw" => Throw,
        "try" => Try,
        "catch" => Catch,
        "switch" => Switch,
        "case" => Case,
        "of" => Of,
        "extern" => Extern,
        "load" => Load,
        "nil" => Nil,
        "true" => True,
        "false" => False,
        "alloc" => Alloc,
        "length" => Length,
        "parse" => Parse,
        "charn" => Charn,
        "chars" => Chars,
        "delete" => Delete,
        _ => return None,
    })
}

fn builtin_type_for(ident: &str) -> Option<BuiltinType> {
    use BuiltinType::*;
    Some(match ident {
        "Number" => Number,
        "String" => String,
        "Boolean" => Boolean,
        "Array" => Array,
        "Dictionary" => Dictionary,
        "Object" => Object,
        "Function" => Function,
        "Type" => Type,
        "Pointer" => Pointer,
        "Nil" => Nil,
        "Any" => Any,
        _ => return None,
    })
}

impl Lexer {
    pub fn new(source: &str, file: &str) -> Self {
        let lines: Vec<Rc<str>> = source.lines().map(Rc::from).collect();
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 0,
            file: file.to_string(),
            lines,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.is_at_end() {
                tokens.push(self.make_token(TokenKind::Eof, String::new()));
                break;
            }
            tokens.push(self.next_token()?);
        }
        Ok(tokens)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn current_source_line(&self) -> Rc<str> {
        self.lines
            .get(self.line - 1)
            .cloned()
            .unwrap_or_else(|| Rc::from(""))
    }

    fn make_token(&self, kind: TokenKind, lexeme: String) -> Token {
        Token::new(kind, lexeme, &self.file, self.line, self.column, self.current_source_line())
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(msg, &self.file, self.line, self.column, &self.current_source_line())
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let start_line = self.line;
        let start_col = self.column;
        let c = self.peek().expect("next_token called at eof");

        if c.is_ascii_digit() {
            return self.read_number(start_line, start_col);
        }
        if c == '_' || c.is_alphabetic() {
            return Ok(self.read_identifier(start_line, start_col));
        }
        if c == '"' {
            return self.read_string(start_line, start_col);
        }
        self.read_operator(start_line, start_col)
    }

    fn read_identifier(&mut self, line: usize, col: usize) -> Token {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = if let Some(kw) = keyword_for(&ident) {
            TokenKind::Keyword(kw)
        } else if let Some(bt) = builtin_type_for(&ident) {
            TokenKind::TypeName(bt)
        } else {
            TokenKind::Identifier
        };
        Token::new(kind, ident, &self.file, line, col, self.current_source_line())
    }

    fn read_number(&mut self, line: usize, col: usize) -> Result<Token, ParseError> {
        let mut lexeme = String::new();

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('b' | 'x')) {
            let radix_char = self.peek_at(1).unwrap();
            lexeme.push(self.advance().unwrap()); // '0'
            lexeme.push(self.advance().unwrap()); // 'b' | 'x'
            let radix = if radix_char == 'b' { 2 } else { 16 };
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_digit(radix) || c == '_' {
                    if c != '_' {
                        digits.push(c);
                    }
                    lexeme.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.error(format!("invalid numeric literal '{lexeme}'")))?;
            return Ok(Token::new(
                TokenKind::Number,
                lexeme,
                &self.file,
                line,
                col,
                self.current_source_line(),
            )
            .with_number(Number::int(value)));
        }

        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit())
        {
            lexeme.push(self.advance().unwrap()); // leading '0'
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_digit(8) || c == '_' {
                    if c != '_' {
                        digits.push(c);
                    }
                    lexeme.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&digits, 8)
                .map_err(|_| self.error(format!("invalid octal literal '{lexeme}'")))?;
            return Ok(Token::new(
                TokenKind::Number,
                lexeme,
                &self.file,
                line,
                col,
                self.current_source_line(),
            )
            .with_number(Number::int(value)));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    lexeme.push(c);
                }
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            lexeme.push(self.advance().unwrap()); // '.'
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == '_' {
                    if c != '_' {
                        lexeme.push(c);
                    }
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let number = if is_float {
            let v: f64 = lexeme
                .parse()
                .map_err(|_| self.error(format!("invalid numeric literal '{lexeme}'")))?;
            Number::from_f64(v)
        } else {
            let v: i64 = lexeme
                .parse()
                .map_err(|_| self.error(format!("invalid numeric literal '{lexeme}'")))?;
            Number::int(v)
        };

        Ok(
            Token::new(TokenKind::Number, lexeme, &self.file, line, col, self.current_source_line())
                .with_number(number),
        )
    }

    fn read_string(&mut self, line: usize, col: usize) -> Result<Token, ParseError> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string literal")),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    value.push(self.read_escape()?);
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(
            TokenKind::String,
            value,
            &self.file,
            line,
            col,
            self.current_source_line(),
        ))
    }

    fn read_escape(&mut self) -> Result<char, ParseError> {
        let c = self.peek().ok_or_else(|| self.error("unterminated escape sequence"))?;
        self.advance();
        Ok(match c {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            'a' => '\u{7}',
            '?' => '?',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            'x' => {
                let hi = self.advance().ok_or_else(|| self.error("truncated \\x escape"))?;
                let lo = self.advance().ok_or_else(|| self.error("truncated \\x escape"))?;
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16)
                    .map_err(|_| self.error("invalid \\x escape"))?;
                byte as char
            }
            'u' => {
                let mut digits = String::new();
                for _ in 0..4 {
                    digits.push(self.advance().ok_or_else(|| self.error("truncated \\u escape"))?);
                }
                let code = u32::from_str_radix(&digits, 16)
                    .map_err(|_| self.error("invalid \\u escape"))?;
                char::from_u32(code).ok_or_else(|| self.error("invalid \\u escape codepoint"))?
            }
            other => return Err(self.error(format!("unrecognized escape '\\{other}'"))),
        })
    }

    /// Longest-match over the fixed operator table: try 3-char, then
    /// 2-char, then 1-char lexemes so e.g. `<<=` outranks `<<` outranks `<`.
    fn read_operator(&mut self, line: usize, col: usize) -> Result<Token, ParseError> {
        use Operator::*;

        let c0 = self.peek().unwrap();
        let c1 = self.peek_at(1);
        let c2 = self.peek_at(2);

        let three: Option<(&str, Operator)> = match (c0, c1, c2) {
            ('<', Some('<'), Some('=')) => Some(("<<=", ShlEq)),
            ('>', Some('>'), Some('=')) => Some((">>=", ShrEq)),
            ('*', Some('*'), Some('=')) => Some(("**=", StarStarEq)),
            ('/', Some('/'), Some('=')) => Some(("//=", SlashSlashEq)),
            ('+', Some('+'), Some('=')) => Some(("++=", PlusPlusEq)),
            ('&', Some('&'), Some('=')) => Some(("&&=", AmpAmpEq)),
            ('|', Some('|'), Some('=')) => Some(("||=", PipePipeEq)),
            _ => None,
        };
        if let Some((lex, op)) = three {
            for _ in 0..3 {
                self.advance();
            }
            return Ok(self.op_token(op, lex, line, col));
        }

        let two: Option<(&str, Operator)> = match (c0, c1) {
            ('=', Some('=')) => Some(("==", EqEq)),
            ('!', Some('=')) => Some(("!=", NotEq)),
            ('=', Some('>')) => Some(("=>", FatArrow)),
            ('-', Some('>')) => Some(("->", Arrow)),
            (':', Some('=')) => Some((":=", ColonEquals)),
            (':', Some(':')) => Some(("::", ColonColon)),
            ('*', Some('*')) => Some(("**", StarStar)),
            ('/', Some('/')) => Some(("//", SlashSlash)),
            ('<', Some('<')) => Some(("<<", Shl)),
            ('>', Some('>')) => Some((">>", Shr)),
            ('<', Some('=')) => Some(("<=", Le)),
            ('>', Some('=')) => Some((">=", Ge)),
            ('&', Some('&')) => Some(("&&", AmpAmp)),
            ('|', Some('|')) => Some(("||", PipePipe)),
            ('.', Some('.')) => Some(("..", DotDot)),
            ('.', Some('+')) => Some((".+", DotPlus)),
            ('.', Some('=')) => Some((".=", DotEq)),
            ('+', Some('+')) => Some(("++", PlusPlus)),
            ('-', Some('-')) => Some(("--", MinusMinus)),
            ('+', Some('=')) => Some(("+=", PlusEq)),
            ('-', Some('=')) => Some(("-=", MinusEq)),
            ('*', Some('=')) => Some(("*=", StarEq)),
            ('/', Some('=')) => Some(("/=", SlashEq)),
            ('%', Some('=')) => Some(("%=", PercentEq)),
            ('|', Some('=')) => Some(("|=", PipeEq)),
            ('&', Some('=')) => Some(("&=", AmpEq)),
            ('^', Some('=')) => Some(("^=", CaretEq)),
            _ => None,
        };
        // `===`/`!==` are 3-char too but built from a 2-char prefix match;
        // check explicitly since the 3-char table above keys off first char.
        if c0 == '=' && c1 == Some('=') && c2 == Some('=') {
            for _ in 0..3 {
                self.advance();
            }
            return Ok(self.op_token(EqEqEq, "===", line, col));
        }
        if c0 == '!' && c1 == Some('=') && c2 == Some('=') {
            for _ in 0..3 {
                self.advance();
            }
            return Ok(self.op_token(NotEqEq, "!==", line, col));
        }
        if let Some((lex, op)) = two {
            self.advance();
            self.advance();
            return Ok(self.op_token(op, lex, line, col));
        }

        let one = match c0 {
            '(' => LParen,
            ')' => RParen,
            '[' => LBracket,
            ']' => RBracket,
            '{' => LBrace,
            '}' => RBrace,
            '.' => Dot,
            ',' => Comma,
            ';' => Semicolon,
            ':' => Colon,
            '?' => Question,
            '+' => Plus,
            '-' => Minus,
            '!' => Bang,
            '$' => Dollar,
            '~' => Tilde,
            '@' => At,
            '*' => Star,
            '/' => Slash,
            '%' => Percent,
            '<' => Lt,
            '>' => Gt,
            '&' => Amp,
            '^' => Caret,
            '|' => Pipe,
            '=' => Assign,
            other => return Err(self.error(format!("unexpected character '{other}'"))),
        };
        let lex = c0.to_string();
        self.advance();
        Ok(self.op_token(one, &lex, line, col))
    }

    fn op_token(&self, op: Operator, lex: &str, line: usize, col: usize) -> Token {
        Token::new(
            TokenKind::Operator(op),
            lex,
            &self.file,
            line,
            col,
            self.current_source_line(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "<test>")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn longest_match_wins_for_shift_assign() {
        let toks = Lexer::new("a <<= b", "<test>").tokenize().unwrap();
        assert!(toks[1].is_op(Operator::ShlEq));
    }

    #[test]
    fn keywords_reclassify_identifiers() {
        let toks = Lexer::new("if x then", "<test>").tokenize().unwrap();
        assert!(toks[0].is_keyword(Keyword::If));
        assert_eq!(toks[1].kind, TokenKind::Identifier);
        assert!(toks[2].is_keyword(Keyword::Then));
    }

    #[test]
    fn number_literals_widen_on_decimal_point() {
        let toks = Lexer::new("1 1.5 0b101 0x1F 0777", "<test>").tokenize().unwrap();
        assert_eq!(toks[0].number, Some(Number::int(1)));
        assert_eq!(toks[1].number, Some(Number::from_f64(1.5)));
        assert_eq!(toks[2].number, Some(Number::int(5)));
        assert_eq!(toks[3].number, Some(Number::int(31)));
        assert_eq!(toks[4].number, Some(Number::int(0o777)));
    }

    #[test]
    fn string_escapes_decode() {
        let toks = Lexer::new(r#""a\nb\x41B""#, "<test>").tokenize().unwrap();
        assert_eq!(toks[0].lexeme, "a\nbAB");
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("1 # trailing comment\n2"), vec![TokenKind::Number, TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(Lexer::new("\"abc", "<test>").tokenize().is_err());
    }
}
