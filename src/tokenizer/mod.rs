use serde::Serialize;
use std::fmt;

use crate::diagnostics::{Diagnostic, DiagnosticBag};

/// Position of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

/// Sigil attached to an identifier token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    /// Bare identifier.
    None,
    /// `$name` global variable.
    Dollar,
    /// `#name` flag variable.
    Hash,
    /// `@name` entity alias.
    At,
    /// `->name` dialogue-block reference, also the far-call separator.
    Arrow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier text including its sigil characters, if any.
    Identifier { text: String, sigil: Sigil },
    String(String),
    Number(f32),
    /// `@`-prefixed numeric literal marking a relative delta.
    DeltaNumber(f32),

    Chapter,
    Scene,
    Function,
    If,
    Else,
    While,
    Break,
    Return,
    Select,
    Case,
    Null,
    True,
    False,
    CallChapter,
    CallScene,
    Include,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AndAnd,
    OrOr,
    Not,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PlusPlus,
    MinusMinus,

    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Colon,

    /// Standalone `@` applied to a following expression (`@$x`), marking the
    /// operand as a relative delta.
    At,

    /// `<pre box>` opening a dialogue paragraph.
    ParagraphStart { box_name: String },
    /// `</pre>` closing a dialogue paragraph.
    ParagraphEnd,
    /// One opaque line of dialogue text inside a paragraph. Markup is not
    /// interpreted here; the text layout engine owns that.
    DialogueLine(String),

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier { text, .. } => write!(f, "{text}"),
            TokenKind::String(s) => write!(f, "\"{s}\""),
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::DeltaNumber(n) => write!(f, "@{n}"),
            TokenKind::DialogueLine(s) => write!(f, "{s}"),
            TokenKind::ParagraphStart { box_name } => write!(f, "<pre {box_name}>"),
            TokenKind::ParagraphEnd => write!(f, "</pre>"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, position: Position) -> Self {
        Self { kind, position }
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier { .. })
    }
}

/// Lexing mode. The tokenizer keeps an explicit stack of these so dialogue
/// paragraphs and parameter lists can suspend normal code lexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexContext {
    Code,
    /// Inside a formal parameter list: sigils are not interpreted and become
    /// part of the parameter name.
    ParameterList,
    /// Inside `<pre>..</pre>`: untagged text runs are opaque dialogue lines.
    Paragraph,
}

pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    contexts: Vec<LexContext>,
    diagnostics: DiagnosticBag,
}

/// Tokenize a whole source file starting in the given context. Lexing never
/// aborts: malformed constructs produce a best-effort token and a diagnostic.
pub fn tokenize(source: &str, initial: LexContext) -> (Vec<Token>, DiagnosticBag) {
    let mut tokenizer = Tokenizer::new(source, initial);
    tokenizer.run();
    (tokenizer.tokens, tokenizer.diagnostics)
}

impl Tokenizer {
    fn new(source: &str, initial: LexContext) -> Self {
        Self {
            input: source.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            contexts: vec![initial],
            diagnostics: DiagnosticBag::new(),
        }
    }

    fn run(&mut self) {
        while !self.at_end() {
            match self.context() {
                LexContext::Paragraph => self.lex_paragraph_line(),
                LexContext::Code | LexContext::ParameterList => self.lex_code_token(),
            }
        }
        if self.contexts.len() > 1 {
            self.diagnostics.report(
                Diagnostic::error("unterminated dialogue block or parameter list at end of file")
                    .at(self.here()),
            );
        }
        let pos = self.here();
        self.tokens.push(Token::new(TokenKind::Eof, pos));
    }

    fn context(&self) -> LexContext {
        *self.contexts.last().unwrap_or(&LexContext::Code)
    }

    fn here(&self) -> Position {
        Position::new(self.line, self.column, self.position)
    }

    fn at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.input.get(self.position + ahead).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn push_token(&mut self, kind: TokenKind, position: Position) {
        self.tokens.push(Token::new(kind, position));
    }

    // ----- paragraph mode ---------------------------------------------------

    fn lex_paragraph_line(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
        if self.at_end() {
            return;
        }
        let start = self.here();
        if self.match_close_tag() {
            self.push_token(TokenKind::ParagraphEnd, start);
            self.contexts.pop();
            return;
        }
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
        }
        let trimmed = text.trim_end().to_string();
        if !trimmed.is_empty() {
            self.push_token(TokenKind::DialogueLine(trimmed), start);
        }
    }

    /// Consume `</pre>` (case-insensitive) if it starts here.
    fn match_close_tag(&mut self) -> bool {
        let tag: Vec<char> = "</pre>".chars().collect();
        for (i, expected) in tag.iter().enumerate() {
            match self.peek_at(i) {
                Some(c) if c.eq_ignore_ascii_case(expected) => {}
                _ => return false,
            }
        }
        for _ in 0..tag.len() {
            self.advance();
        }
        true
    }

    // ----- code / parameter-list mode ---------------------------------------

    fn lex_code_token(&mut self) {
        self.skip_trivia();
        if self.at_end() {
            return;
        }
        let start = self.here();
        let ch = self.peek().unwrap_or('\0');

        if self.context() == LexContext::ParameterList && matches!(ch, '$' | '#' | '@') {
            // Sigils in a formal parameter list are part of the name.
            let mut text = String::new();
            text.push(ch);
            self.advance();
            text.push_str(&self.read_identifier_tail());
            self.push_token(
                TokenKind::Identifier {
                    text,
                    sigil: Sigil::None,
                },
                start,
            );
            return;
        }

        match ch {
            '"' => self.lex_string(start),
            '0'..='9' => self.lex_number(start),
            '$' => {
                self.advance();
                let tail = self.read_identifier_tail();
                self.push_token(
                    TokenKind::Identifier {
                        text: format!("${tail}"),
                        sigil: Sigil::Dollar,
                    },
                    start,
                );
            }
            '#' => self.lex_hash(start),
            '@' => self.lex_at(start),
            '<' => self.lex_angle(start),
            c if is_identifier_start(c) => self.lex_word(start),
            _ => self.lex_operator(start),
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while matches!(self.peek(), Some(c) if c != '\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.here();
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(c) = self.advance() {
                        if c == '*' && self.peek() == Some('/') {
                            self.advance();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        self.diagnostics
                            .report(Diagnostic::error("unterminated block comment").at(start));
                    }
                }
                _ => break,
            }
        }
    }

    fn read_identifier_tail(&mut self) -> String {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if is_identifier_part(c)) {
            text.push(self.advance().unwrap_or('\0'));
        }
        text
    }

    fn lex_string(&mut self, start: Position) {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.diagnostics
                        .report(Diagnostic::error("unterminated string literal").at(start));
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => text.push(other),
                        None => break,
                    }
                }
                Some(other) => {
                    text.push(other);
                    self.advance();
                }
            }
        }
        self.push_token(TokenKind::String(text), start);
    }

    fn lex_number(&mut self, start: Position) {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap_or('\0'));
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap_or('\0'));
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.advance().unwrap_or('\0'));
            }
        }
        let value = text.parse::<f32>().unwrap_or_else(|_| {
            self.diagnostics
                .report(Diagnostic::error(format!("malformed number `{text}`")).at(start));
            0.0
        });
        self.push_token(TokenKind::Number(value), start);
    }

    /// `#RRGGBB` hex color, `#include`, or a `#flag` identifier.
    fn lex_hash(&mut self, start: Position) {
        self.advance(); // '#'
        let hex_len = (0..6)
            .take_while(|i| matches!(self.peek_at(*i), Some(c) if c.is_ascii_hexdigit()))
            .count();
        let boundary = !matches!(self.peek_at(6), Some(c) if is_identifier_part(c));
        if hex_len == 6 && boundary {
            let mut text = String::new();
            for _ in 0..6 {
                text.push(self.advance().unwrap_or('\0'));
            }
            let packed = u32::from_str_radix(&text, 16).unwrap_or(0);
            self.push_token(TokenKind::Number(packed as f32), start);
            return;
        }
        let tail = self.read_identifier_tail();
        if tail == "include" {
            self.push_token(TokenKind::Include, start);
            return;
        }
        if tail.is_empty() {
            self.diagnostics
                .report(Diagnostic::error("stray `#` in source").at(start));
            return;
        }
        self.push_token(
            TokenKind::Identifier {
                text: format!("#{tail}"),
                sigil: Sigil::Hash,
            },
            start,
        );
    }

    /// `@100` relative delta, `@` delta operator, or an `@alias` identifier.
    fn lex_at(&mut self, start: Position) {
        self.advance(); // '@'
        if matches!(self.peek(), Some('$') | Some('#') | Some('(')) {
            self.push_token(TokenKind::At, start);
            return;
        }
        let negative = self.peek() == Some('-')
            && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit());
        if negative {
            self.advance();
        }
        if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            let mut text = String::new();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                text.push(self.advance().unwrap_or('\0'));
            }
            let mut value = text.parse::<f32>().unwrap_or(0.0);
            if negative {
                value = -value;
            }
            self.push_token(TokenKind::DeltaNumber(value), start);
            return;
        }
        let tail = self.read_identifier_tail();
        if tail.is_empty() {
            self.diagnostics
                .report(Diagnostic::error("stray `@` in source").at(start));
            return;
        }
        self.push_token(
            TokenKind::Identifier {
                text: format!("@{tail}"),
                sigil: Sigil::At,
            },
            start,
        );
    }

    /// `<pre box>` opens a paragraph; anything else from `<` is a comparison.
    fn lex_angle(&mut self, start: Position) {
        if self.is_open_tag() {
            self.advance(); // '<'
            for _ in 0.."pre".len() {
                self.advance();
            }
            let mut box_name = String::new();
            let mut closed = false;
            while let Some(c) = self.peek() {
                if c == '>' {
                    self.advance();
                    closed = true;
                    break;
                }
                if c == '\n' {
                    break;
                }
                box_name.push(c);
                self.advance();
            }
            if !closed {
                self.diagnostics
                    .report(Diagnostic::error("unterminated `<pre>` tag").at(start));
            }
            self.push_token(
                TokenKind::ParagraphStart {
                    box_name: box_name.trim().to_string(),
                },
                start,
            );
            self.contexts.push(LexContext::Paragraph);
            return;
        }
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            self.push_token(TokenKind::LessEqual, start);
        } else {
            self.push_token(TokenKind::Less, start);
        }
    }

    fn is_open_tag(&self) -> bool {
        let tag: Vec<char> = "<pre".chars().collect();
        for (i, expected) in tag.iter().enumerate() {
            match self.peek_at(i) {
                Some(c) if c.eq_ignore_ascii_case(expected) => {}
                _ => return false,
            }
        }
        // Must be followed by whitespace or `>` so `<previous` stays code.
        matches!(self.peek_at(tag.len()), Some(c) if c.is_whitespace() || c == '>')
    }

    fn lex_word(&mut self, start: Position) {
        let text = self.read_identifier_tail();
        let kind = match text.as_str() {
            "chapter" => TokenKind::Chapter,
            "scene" => TokenKind::Scene,
            "function" => TokenKind::Function,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "return" => TokenKind::Return,
            "select" => TokenKind::Select,
            "case" => TokenKind::Case,
            "null" => TokenKind::Null,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "call_chapter" => TokenKind::CallChapter,
            "call_scene" => TokenKind::CallScene,
            _ => TokenKind::Identifier {
                text,
                sigil: Sigil::None,
            },
        };
        if kind == TokenKind::Function {
            self.contexts.push(LexContext::ParameterList);
        }
        self.push_token(kind, start);
    }

    fn lex_operator(&mut self, start: Position) {
        let ch = self.advance().unwrap_or('\0');
        let next = self.peek();
        let kind = match (ch, next) {
            ('-', Some('>')) if matches!(self.peek_at(1), Some(c) if is_identifier_start(c)) => {
                self.advance(); // '>'
                let tail = self.read_identifier_tail();
                TokenKind::Identifier {
                    text: format!("->{tail}"),
                    sigil: Sigil::Arrow,
                }
            }
            ('+', Some('+')) => {
                self.advance();
                TokenKind::PlusPlus
            }
            ('+', Some('=')) => {
                self.advance();
                TokenKind::PlusEqual
            }
            ('-', Some('-')) => {
                self.advance();
                TokenKind::MinusMinus
            }
            ('-', Some('=')) => {
                self.advance();
                TokenKind::MinusEqual
            }
            ('*', Some('=')) => {
                self.advance();
                TokenKind::StarEqual
            }
            ('/', Some('=')) => {
                self.advance();
                TokenKind::SlashEqual
            }
            ('=', Some('=')) => {
                self.advance();
                TokenKind::EqualEqual
            }
            ('!', Some('=')) => {
                self.advance();
                TokenKind::NotEqual
            }
            ('>', Some('=')) => {
                self.advance();
                TokenKind::GreaterEqual
            }
            ('&', Some('&')) => {
                self.advance();
                TokenKind::AndAnd
            }
            ('|', Some('|')) => {
                self.advance();
                TokenKind::OrOr
            }
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('=', _) => TokenKind::Equal,
            ('!', _) => TokenKind::Not,
            ('>', _) => TokenKind::Greater,
            ('(', _) => TokenKind::LeftParen,
            (')', _) => {
                if self.context() == LexContext::ParameterList {
                    self.contexts.pop();
                }
                TokenKind::RightParen
            }
            ('{', _) => {
                self.contexts.push(LexContext::Code);
                TokenKind::LeftBrace
            }
            ('}', _) => {
                if self.context() == LexContext::Code && self.contexts.len() > 1 {
                    self.contexts.pop();
                }
                TokenKind::RightBrace
            }
            (',', _) => TokenKind::Comma,
            (';', _) => TokenKind::Semicolon,
            (':', _) => TokenKind::Colon,
            (other, _) => {
                self.diagnostics.report(
                    Diagnostic::warning(format!("unexpected character `{other}`")).at(start),
                );
                return;
            }
        };
        self.push_token(kind, start);
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, _) = tokenize(source, LexContext::Code);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_variable_sigils() {
        let kinds = kinds("$count = #flag + 1;");
        assert_eq!(
            kinds[0],
            TokenKind::Identifier {
                text: "$count".into(),
                sigil: Sigil::Dollar
            }
        );
        assert_eq!(
            kinds[2],
            TokenKind::Identifier {
                text: "#flag".into(),
                sigil: Sigil::Hash
            }
        );
    }

    #[test]
    fn lexes_hex_color_as_number() {
        let kinds = kinds("#FF00FF");
        assert_eq!(kinds[0], TokenKind::Number(0xFF00FF as f32));
    }

    #[test]
    fn lexes_delta_number() {
        let kinds = kinds("@100 @-50");
        assert_eq!(kinds[0], TokenKind::DeltaNumber(100.0));
        assert_eq!(kinds[1], TokenKind::DeltaNumber(-50.0));
    }

    #[test]
    fn parameter_list_keeps_sigils_uninterpreted() {
        let kinds = kinds("function f($a, #b)");
        assert_eq!(
            kinds[3],
            TokenKind::Identifier {
                text: "$a".into(),
                sigil: Sigil::None
            }
        );
        assert_eq!(
            kinds[5],
            TokenKind::Identifier {
                text: "#b".into(),
                sigil: Sigil::None
            }
        );
    }

    #[test]
    fn paragraph_collects_opaque_lines() {
        let source = "<pre box01>\nHello there.\n{...not code...}\n</pre>";
        let kinds = kinds(source);
        assert_eq!(
            kinds[0],
            TokenKind::ParagraphStart {
                box_name: "box01".into()
            }
        );
        assert_eq!(kinds[1], TokenKind::DialogueLine("Hello there.".into()));
        assert_eq!(kinds[2], TokenKind::DialogueLine("{...not code...}".into()));
        assert_eq!(kinds[3], TokenKind::ParagraphEnd);
    }

    #[test]
    fn unterminated_string_recovers() {
        let (tokens, diagnostics) = tokenize("\"oops\n$x = 1;", LexContext::Code);
        assert!(diagnostics.has_errors());
        assert_eq!(tokens[0].kind, TokenKind::String("oops".into()));
        // Lexing continued past the error.
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Semicolon));
    }

    #[test]
    fn arrow_sigil_is_two_characters() {
        let kinds = kinds("call_scene sys->scene_main;");
        assert_eq!(kinds[0], TokenKind::CallScene);
        assert_eq!(
            kinds[2],
            TokenKind::Identifier {
                text: "->scene_main".into(),
                sigil: Sigil::Arrow
            }
        );
    }
}
