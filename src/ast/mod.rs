use crate::tokenizer::{Position, Sigil};

/// One parsed `.nss` source file.
#[derive(Debug, Clone, Default)]
pub struct SourceFileSyntax {
    pub file_name: String,
    pub includes: Vec<String>,
    pub subroutines: Vec<SubroutineDecl>,
}

/// The unit of compiled code and of a call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubroutineKind {
    Chapter,
    Scene,
    Function,
}

#[derive(Debug, Clone)]
pub struct SubroutineDecl {
    pub kind: SubroutineKind,
    pub name: String,
    /// Formal parameter names, spelled exactly as declared (sigils included).
    /// Only functions declare parameters.
    pub parameters: Vec<String>,
    pub body: Block,
    /// Dialogue blocks appearing in the body, in source order.
    pub dialogue_blocks: Vec<DialogueBlockDecl>,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct DialogueBlockDecl {
    /// Name of the dialogue box the block renders into.
    pub box_name: String,
    /// Block identity, addressable from script via `->name`.
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Block(Block),
    Expression {
        expr: Expr,
        position: Position,
    },
    If {
        condition: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    Break {
        position: Position,
    },
    Return {
        position: Position,
    },
    Select {
        cases: Vec<SelectCase>,
    },
    /// `<pre box>...</pre>` dialogue paragraph. `block_index` points into the
    /// enclosing subroutine's `dialogue_blocks`.
    DialogueBlock {
        block_index: usize,
        lines: Vec<String>,
    },
    CallChapter {
        module: Option<String>,
        target: String,
        position: Position,
    },
    CallScene {
        module: Option<String>,
        target: String,
        position: Position,
    },
}

#[derive(Debug, Clone)]
pub struct SelectCase {
    pub choice: String,
    pub body: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
    Not,
    /// `@expr`: converts a numeric operand into a relative delta.
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperator {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    Increment,
    Decrement,
}

#[derive(Debug, Clone)]
pub enum Expr {
    NullLiteral,
    BooleanLiteral(bool),
    NumberLiteral(f32),
    DeltaLiteral(f32),
    StringLiteral(String),
    /// Unresolved name; the checker decides what it denotes.
    Name {
        text: String,
        sigil: Sigil,
        position: Position,
    },
    /// Reference to a formal parameter of the enclosing function. Produced by
    /// the parser, which tracks the active parameter set while descending.
    Parameter {
        name: String,
        position: Position,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assignment {
        operator: AssignmentOperator,
        target: Box<Expr>,
        value: Option<Box<Expr>>,
        position: Position,
    },
    Call {
        callee: String,
        /// Import module for far calls (`module->target(..)`).
        module: Option<String>,
        arguments: Vec<Expr>,
        position: Position,
    },
    /// `{ {p0, p1, p2, p3}, ... }` composite cubic bezier literal; each inner
    /// group holds exactly four `(x, y)` control points.
    BezierCurve {
        segments: Vec<BezierSegmentSyntax>,
    },
}

#[derive(Debug, Clone)]
pub struct BezierSegmentSyntax {
    pub points: [(Expr, Expr); 4],
}

impl Expr {
    pub fn position(&self) -> Option<Position> {
        match self {
            Expr::Name { position, .. }
            | Expr::Parameter { position, .. }
            | Expr::Assignment { position, .. }
            | Expr::Call { position, .. } => Some(*position),
            Expr::Unary { operand, .. } => operand.position(),
            Expr::Binary { left, .. } => left.position(),
            _ => None,
        }
    }
}
