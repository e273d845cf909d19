use thiserror::Error;

use crate::ast::{
    AssignmentOperator, BezierSegmentSyntax, BinaryOperator, Block, DialogueBlockDecl, Expr,
    SelectCase, SourceFileSyntax, Statement, SubroutineDecl, SubroutineKind, UnaryOperator,
};
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::tokenizer::{Position, Sigil, Token, TokenKind};

/// Fatal parse failure. Anything recoverable goes into the diagnostic bag
/// instead; an `Err` here aborts compilation of the offending file only.
#[derive(Debug, Error, Clone)]
pub enum ParseError {
    #[error("{file}:{line}:{column}: unexpected token `{found}`, expected {expected}")]
    UnexpectedToken {
        file: String,
        found: String,
        expected: String,
        line: usize,
        column: usize,
    },
    #[error("{file}: unexpected end of file, expected {expected}")]
    UnexpectedEof { file: String, expected: String },
    #[error("{file}:{line}:{column}: expression nesting too deep")]
    TooDeep {
        file: String,
        line: usize,
        column: usize,
    },
}

const MAX_EXPRESSION_DEPTH: usize = 256;

/// Recursive descent parser over a fully pre-lexed token buffer.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    file_name: String,
    expr_depth: usize,
    /// Formal parameters of the function currently being parsed. Any
    /// identifier or string matching one of these resolves as a parameter
    /// reference, never as a constant or call target.
    active_parameters: Vec<String>,
    dialogue_blocks: Vec<DialogueBlockDecl>,
    diagnostics: DiagnosticBag,
}

pub fn parse_source_file(
    file_name: &str,
    tokens: Vec<Token>,
) -> (Result<SourceFileSyntax, ParseError>, DiagnosticBag) {
    let mut parser = Parser::new(file_name, tokens);
    let result = parser.parse_file();
    (result, parser.diagnostics)
}

impl Parser {
    fn new(file_name: &str, tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            file_name: file_name.to_string(),
            expr_depth: 0,
            active_parameters: Vec::new(),
            dialogue_blocks: Vec::new(),
            diagnostics: DiagnosticBag::new(),
        }
    }

    // ----- token access -----------------------------------------------------

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        self.tokens
            .get(self.current + ahead)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn position(&self) -> Position {
        self.tokens
            .get(self.current)
            .or_else(|| self.tokens.last())
            .map(|t| t.position)
            .unwrap_or(Position::new(1, 1, 0))
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<(), ParseError> {
        if self.peek() == &kind {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            TokenKind::Eof => ParseError::UnexpectedEof {
                file: self.file_name.clone(),
                expected: expected.to_string(),
            },
            found => {
                let pos = self.position();
                ParseError::UnexpectedToken {
                    file: self.file_name.clone(),
                    found: found.to_string(),
                    expected: expected.to_string(),
                    line: pos.line,
                    column: pos.column,
                }
            }
        }
    }

    /// A missing statement terminator is a recoverable issue.
    fn expect_semicolon(&mut self) {
        if !self.matches(&TokenKind::Semicolon) {
            let pos = self.position();
            self.diagnostics.report(
                Diagnostic::warning("missing `;` after statement")
                    .in_file(self.file_name.clone())
                    .at(pos),
            );
        }
    }

    // ----- declarations -----------------------------------------------------

    fn parse_file(&mut self) -> Result<SourceFileSyntax, ParseError> {
        let mut file = SourceFileSyntax {
            file_name: self.file_name.clone(),
            ..Default::default()
        };
        loop {
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Include => {
                    self.advance();
                    match self.advance() {
                        TokenKind::String(path) => file.includes.push(path),
                        _ => {
                            let pos = self.position();
                            self.diagnostics.report(
                                Diagnostic::error("`#include` expects a quoted file name")
                                    .in_file(self.file_name.clone())
                                    .at(pos),
                            );
                        }
                    }
                }
                TokenKind::Chapter => {
                    let decl = self.parse_subroutine(SubroutineKind::Chapter)?;
                    file.subroutines.push(decl);
                }
                TokenKind::Scene => {
                    let decl = self.parse_subroutine(SubroutineKind::Scene)?;
                    file.subroutines.push(decl);
                }
                TokenKind::Function => {
                    let decl = self.parse_subroutine(SubroutineKind::Function)?;
                    file.subroutines.push(decl);
                }
                stray => {
                    let pos = self.position();
                    self.diagnostics.report(
                        Diagnostic::warning(format!(
                            "stray token `{stray}` outside any subroutine"
                        ))
                        .in_file(self.file_name.clone())
                        .at(pos),
                    );
                    self.advance();
                }
            }
        }
        Ok(file)
    }

    fn parse_subroutine(&mut self, kind: SubroutineKind) -> Result<SubroutineDecl, ParseError> {
        let position = self.position();
        self.advance(); // keyword
        let name = match self.advance() {
            TokenKind::Identifier { text, .. } => text,
            _ => return Err(self.unexpected("subroutine name")),
        };
        let parameters = if kind == SubroutineKind::Function {
            self.parse_parameter_list()?
        } else {
            Vec::new()
        };
        self.active_parameters = parameters.clone();
        self.dialogue_blocks = Vec::new();
        let body = self.parse_block()?;
        self.active_parameters.clear();
        Ok(SubroutineDecl {
            kind,
            name,
            parameters,
            body,
            dialogue_blocks: std::mem::take(&mut self.dialogue_blocks),
            position,
        })
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LeftParen, "`(`")?;
        let mut parameters = Vec::new();
        if self.peek() != &TokenKind::RightParen {
            loop {
                match self.advance() {
                    TokenKind::Identifier { text, .. } => parameters.push(text),
                    _ => return Err(self.unexpected("parameter name")),
                }
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "`)`")?;
        Ok(parameters)
    }

    // ----- statements -------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::LeftBrace, "`{`")?;
        let mut statements = Vec::new();
        while self.peek() != &TokenKind::RightBrace {
            if self.peek() == &TokenKind::Eof {
                return Err(self.unexpected("`}`"));
            }
            statements.push(self.parse_statement()?);
        }
        self.advance(); // `}`
        Ok(Block { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek().clone() {
            TokenKind::LeftBrace => Ok(Statement::Block(self.parse_block()?)),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Break => {
                let position = self.position();
                self.advance();
                self.expect_semicolon();
                Ok(Statement::Break { position })
            }
            TokenKind::Return => {
                let position = self.position();
                self.advance();
                self.expect_semicolon();
                Ok(Statement::Return { position })
            }
            TokenKind::Select => self.parse_select(),
            TokenKind::ParagraphStart { box_name } => self.parse_dialogue_block(box_name),
            TokenKind::CallChapter => {
                let position = self.position();
                self.advance();
                let (module, target) = self.parse_call_target()?;
                self.expect_semicolon();
                Ok(Statement::CallChapter {
                    module,
                    target,
                    position,
                })
            }
            TokenKind::CallScene => {
                let position = self.position();
                self.advance();
                let (module, target) = self.parse_call_target()?;
                self.expect_semicolon();
                Ok(Statement::CallScene {
                    module,
                    target,
                    position,
                })
            }
            _ => {
                let position = self.position();
                let expr = self.parse_expression()?;
                self.expect_semicolon();
                Ok(Statement::Expression { expr, position })
            }
        }
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        self.advance(); // `if`
        self.expect(TokenKind::LeftParen, "`(`")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "`)`")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.matches(&TokenKind::Else) {
            if self.peek() == &TokenKind::If {
                let chained = self.parse_if()?;
                Some(Block {
                    statements: vec![chained],
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        self.advance(); // `while`
        self.expect(TokenKind::LeftParen, "`(`")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "`)`")?;
        let body = self.parse_block()?;
        Ok(Statement::While { condition, body })
    }

    fn parse_select(&mut self) -> Result<Statement, ParseError> {
        self.advance(); // `select`
        self.expect(TokenKind::LeftBrace, "`{`")?;
        let mut cases = Vec::new();
        while self.peek() != &TokenKind::RightBrace {
            self.expect(TokenKind::Case, "`case`")?;
            let choice = match self.advance() {
                TokenKind::Identifier { text, .. } => text,
                TokenKind::String(text) => text,
                _ => return Err(self.unexpected("choice name")),
            };
            self.expect(TokenKind::Colon, "`:`")?;
            let body = self.parse_block()?;
            cases.push(SelectCase { choice, body });
        }
        self.advance(); // `}`
        if cases.is_empty() {
            let pos = self.position();
            self.diagnostics.report(
                Diagnostic::warning("`select` with no cases")
                    .in_file(self.file_name.clone())
                    .at(pos),
            );
        }
        Ok(Statement::Select { cases })
    }

    fn parse_dialogue_block(&mut self, box_name: String) -> Result<Statement, ParseError> {
        self.advance(); // paragraph start
        let block_index = self.dialogue_blocks.len();
        self.dialogue_blocks.push(DialogueBlockDecl {
            box_name,
            name: format!("text{:03}", block_index + 1),
        });
        let mut lines = Vec::new();
        loop {
            match self.advance() {
                TokenKind::DialogueLine(line) => lines.push(line),
                TokenKind::ParagraphEnd => break,
                TokenKind::Eof => return Err(self.unexpected("`</pre>`")),
                _ => return Err(self.unexpected("dialogue text or `</pre>`")),
            }
        }
        Ok(Statement::DialogueBlock { block_index, lines })
    }

    /// `target` or `module->target` after `call_chapter` / `call_scene`.
    fn parse_call_target(&mut self) -> Result<(Option<String>, String), ParseError> {
        match self.advance() {
            TokenKind::Identifier {
                text,
                sigil: Sigil::Arrow,
            } => Ok((None, strip_arrow(&text))),
            TokenKind::Identifier { text, .. } => match self.peek() {
                TokenKind::Identifier {
                    sigil: Sigil::Arrow,
                    ..
                } => {
                    let target = match self.advance() {
                        TokenKind::Identifier { text, .. } => strip_arrow(&text),
                        _ => unreachable!("peeked arrow identifier"),
                    };
                    Ok((Some(text), target))
                }
                _ => Ok((None, text)),
            },
            _ => Err(self.unexpected("call target")),
        }
    }

    // ----- expressions ------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPRESSION_DEPTH {
            let pos = self.position();
            self.expr_depth -= 1;
            return Err(ParseError::TooDeep {
                file: self.file_name.clone(),
                line: pos.line,
                column: pos.column,
            });
        }
        let result = self.parse_assignment();
        self.expr_depth -= 1;
        result
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let position = self.position();
        let left = self.parse_or()?;
        let operator = match self.peek() {
            TokenKind::Equal => Some(AssignmentOperator::Assign),
            TokenKind::PlusEqual => Some(AssignmentOperator::AddAssign),
            TokenKind::MinusEqual => Some(AssignmentOperator::SubtractAssign),
            TokenKind::StarEqual => Some(AssignmentOperator::MultiplyAssign),
            TokenKind::SlashEqual => Some(AssignmentOperator::DivideAssign),
            TokenKind::PlusPlus => Some(AssignmentOperator::Increment),
            TokenKind::MinusMinus => Some(AssignmentOperator::Decrement),
            _ => None,
        };
        let Some(operator) = operator else {
            return Ok(left);
        };
        self.advance();
        let value = match operator {
            AssignmentOperator::Increment | AssignmentOperator::Decrement => None,
            _ => Some(Box::new(self.parse_assignment()?)),
        };
        Ok(Expr::Assignment {
            operator,
            target: Box::new(left),
            value,
            position,
        })
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.matches(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = binary(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.matches(&TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = binary(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let operator = match self.peek() {
                TokenKind::EqualEqual => BinaryOperator::Equals,
                TokenKind::NotEqual => BinaryOperator::NotEquals,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = binary(operator, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let operator = match self.peek() {
                TokenKind::Less => BinaryOperator::Less,
                TokenKind::LessEqual => BinaryOperator::LessOrEqual,
                TokenKind::Greater => BinaryOperator::Greater,
                TokenKind::GreaterEqual => BinaryOperator::GreaterOrEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(operator, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let operator = match self.peek() {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(operator, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let operator = match self.peek() {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                TokenKind::Percent => BinaryOperator::Remainder,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(operator, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let operator = match self.peek() {
            TokenKind::Minus => Some(UnaryOperator::Minus),
            TokenKind::Not => Some(UnaryOperator::Not),
            TokenKind::At => Some(UnaryOperator::Delta),
            _ => None,
        };
        if let Some(operator) = operator {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                operator,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.position();
        match self.peek().clone() {
            TokenKind::Null => {
                self.advance();
                Ok(Expr::NullLiteral)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::BooleanLiteral(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BooleanLiteral(false))
            }
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::NumberLiteral(value))
            }
            TokenKind::DeltaNumber(value) => {
                self.advance();
                Ok(Expr::DeltaLiteral(value))
            }
            TokenKind::String(text) => {
                self.advance();
                if self.active_parameters.contains(&text) {
                    // A quoted parameter name still refers to the parameter.
                    Ok(Expr::Parameter {
                        name: text,
                        position,
                    })
                } else {
                    Ok(Expr::StringLiteral(text))
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RightParen, "`)`")?;
                Ok(inner)
            }
            TokenKind::LeftBrace => self.parse_bezier_literal(),
            TokenKind::Identifier { text, sigil } => {
                self.advance();
                self.parse_name_or_call(text, sigil, position)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_name_or_call(
        &mut self,
        text: String,
        sigil: Sigil,
        position: Position,
    ) -> Result<Expr, ParseError> {
        // Parameter references shadow every other meaning of the name.
        if self.active_parameters.contains(&text) {
            return Ok(Expr::Parameter {
                name: text,
                position,
            });
        }
        // `module->target(...)` far call.
        if sigil == Sigil::None {
            if let TokenKind::Identifier {
                sigil: Sigil::Arrow,
                ..
            } = self.peek()
            {
                let target = match self.advance() {
                    TokenKind::Identifier { text, .. } => strip_arrow(&text),
                    _ => unreachable!("peeked arrow identifier"),
                };
                let arguments = self.parse_argument_list()?;
                return Ok(Expr::Call {
                    callee: target,
                    module: Some(text),
                    arguments,
                    position,
                });
            }
            if self.peek() == &TokenKind::LeftParen {
                let arguments = self.parse_argument_list()?;
                return Ok(Expr::Call {
                    callee: text,
                    module: None,
                    arguments,
                    position,
                });
            }
        }
        Ok(Expr::Name {
            text,
            sigil,
            position,
        })
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokenKind::LeftParen, "`(`")?;
        let mut arguments = Vec::new();
        if self.peek() != &TokenKind::RightParen {
            loop {
                arguments.push(self.parse_expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "`)`")?;
        Ok(arguments)
    }

    /// `{ {p, p, p, p}, ... }` where each `p` is `(x, y)`.
    fn parse_bezier_literal(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LeftBrace, "`{`")?;
        let mut segments = Vec::new();
        loop {
            segments.push(self.parse_bezier_segment()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "`}`")?;
        Ok(Expr::BezierCurve { segments })
    }

    fn parse_bezier_segment(&mut self) -> Result<BezierSegmentSyntax, ParseError> {
        self.expect(TokenKind::LeftBrace, "`{`")?;
        let p0 = self.parse_bezier_point()?;
        self.expect(TokenKind::Comma, "`,`")?;
        let p1 = self.parse_bezier_point()?;
        self.expect(TokenKind::Comma, "`,`")?;
        let p2 = self.parse_bezier_point()?;
        self.expect(TokenKind::Comma, "`,`")?;
        let p3 = self.parse_bezier_point()?;
        self.expect(TokenKind::RightBrace, "`}`")?;
        Ok(BezierSegmentSyntax {
            points: [p0, p1, p2, p3],
        })
    }

    fn parse_bezier_point(&mut self) -> Result<(Expr, Expr), ParseError> {
        self.expect(TokenKind::LeftParen, "`(`")?;
        let x = self.parse_expression()?;
        self.expect(TokenKind::Comma, "`,`")?;
        let y = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "`)`")?;
        Ok((x, y))
    }
}

fn binary(operator: BinaryOperator, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        operator,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn strip_arrow(text: &str) -> String {
    text.strip_prefix("->").unwrap_or(text).to_string()
}
