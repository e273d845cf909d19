pub mod disasm;
pub mod globals;
pub mod module;

pub use module::{DialogueBlockRecord, NsxError, NsxModule, SubroutineRecord};

use thiserror::Error;

/// Bytecode operation tags. Every instruction is one tag byte followed by its
/// little-endian operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    /// Immediate load: tag byte + payload (see `ImmediateValue`).
    LoadImm = 1,
    /// u16 global slot.
    LoadVar = 2,
    /// u16 global slot.
    StoreVar = 3,
    /// u8 `BinaryOp` selector.
    Binary = 4,
    Equal = 5,
    NotEqual = 6,
    Neg = 7,
    Not = 8,
    /// Converts a numeric operand into a relative delta.
    Delta = 9,
    /// i16 relative offset.
    Jump = 10,
    JumpIfTrue = 11,
    JumpIfFalse = 12,
    /// u16 subroutine index in the current module.
    Call = 13,
    /// u16 import token + u16 name token.
    CallFar = 14,
    /// u16 import token (0xFFFF = current module) + u16 name token.
    /// Spawns a thread on the target scene and joins the caller on it.
    CallScene = 15,
    Return = 16,
    /// u16 built-in id + u8 argument count.
    Dispatch = 17,
    /// u16 dialogue block index.
    ActivateBlock = 18,
    /// u16 string token.
    AppendDialogue = 19,
    LineEnd = 20,
    SelectStart = 21,
    /// u16 string token naming the polled choice.
    GetSelChoice = 22,
    SelectEnd = 23,
    BezierStart = 24,
    /// Pops four (x, y) point pairs, pushes one cubic segment on the
    /// auxiliary segment stack.
    BezierSegment = 25,
    BezierEnd = 26,
    Pop = 27,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown opcode {0}")]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(byte: u8) -> Result<Self, UnknownOpcode> {
        use Opcode::*;
        Ok(match byte {
            0 => Nop,
            1 => LoadImm,
            2 => LoadVar,
            3 => StoreVar,
            4 => Binary,
            5 => Equal,
            6 => NotEqual,
            7 => Neg,
            8 => Not,
            9 => Delta,
            10 => Jump,
            11 => JumpIfTrue,
            12 => JumpIfFalse,
            13 => Call,
            14 => CallFar,
            15 => CallScene,
            16 => Return,
            17 => Dispatch,
            18 => ActivateBlock,
            19 => AppendDialogue,
            20 => LineEnd,
            21 => SelectStart,
            22 => GetSelChoice,
            23 => SelectEnd,
            24 => BezierStart,
            25 => BezierSegment,
            26 => BezierEnd,
            27 => Pop,
            other => return Err(UnknownOpcode(other)),
        })
    }
}

impl Opcode {
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            LoadImm => "LOAD_IMM",
            LoadVar => "LOAD_VAR",
            StoreVar => "STORE_VAR",
            Binary => "BINARY",
            Equal => "EQUAL",
            NotEqual => "NOT_EQUAL",
            Neg => "NEG",
            Not => "NOT",
            Delta => "DELTA",
            Jump => "JUMP",
            JumpIfTrue => "JUMP_IF_TRUE",
            JumpIfFalse => "JUMP_IF_FALSE",
            Call => "CALL",
            CallFar => "CALL_FAR",
            CallScene => "CALL_SCENE",
            Return => "RETURN",
            Dispatch => "DISPATCH",
            ActivateBlock => "ACTIVATE_BLOCK",
            AppendDialogue => "APPEND_DIALOGUE",
            LineEnd => "LINE_END",
            SelectStart => "SELECT_START",
            GetSelChoice => "GET_SEL_CHOICE",
            SelectEnd => "SELECT_END",
            BezierStart => "BEZIER_START",
            BezierSegment => "BEZIER_SEGMENT",
            BezierEnd => "BEZIER_END",
            Pop => "POP",
        }
    }
}

/// Payload tag for `LoadImm`.
pub mod imm_tag {
    pub const NULL: u8 = 0;
    pub const TRUE: u8 = 1;
    pub const FALSE: u8 = 2;
    pub const NUMBER: u8 = 3;
    pub const DELTA: u8 = 4;
    pub const STRING: u8 = 5;
    pub const BUILTIN_CONST: u8 = 6;
}

/// Operand selector for the `Binary` opcode. Equality is deliberately not in
/// this table; it compares across value kinds and has its own opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0,
    Subtract = 1,
    Multiply = 2,
    Divide = 3,
    Remainder = 4,
    Less = 5,
    LessOrEqual = 6,
    Greater = 7,
    GreaterOrEqual = 8,
    And = 9,
    Or = 10,
}

impl TryFrom<u8> for BinaryOp {
    type Error = UnknownOpcode;

    fn try_from(byte: u8) -> Result<Self, UnknownOpcode> {
        use BinaryOp::*;
        Ok(match byte {
            0 => Add,
            1 => Subtract,
            2 => Multiply,
            3 => Divide,
            4 => Remainder,
            5 => Less,
            6 => LessOrEqual,
            7 => Greater,
            8 => GreaterOrEqual,
            9 => And,
            10 => Or,
            other => return Err(UnknownOpcode(other)),
        })
    }
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Add => "add",
            Subtract => "sub",
            Multiply => "mul",
            Divide => "div",
            Remainder => "rem",
            Less => "lt",
            LessOrEqual => "le",
            Greater => "gt",
            GreaterOrEqual => "ge",
            And => "and",
            Or => "or",
        }
    }
}

/// Branch offsets are relative to the byte position of the operand itself,
/// the position immediately before its two bytes. Emitter and interpreter
/// must share this arithmetic bit for bit; both call these two helpers.
/// Returns `None` when the delta does not fit the i16 operand.
pub fn branch_offset(operand_pos: usize, target: usize) -> Option<i16> {
    i16::try_from(target as i64 - operand_pos as i64).ok()
}

pub fn branch_target(operand_pos: usize, offset: i16) -> usize {
    (operand_pos as i64 + offset as i64) as usize
}

/// Append-only little-endian code buffer with back-patching support.
#[derive(Debug, Default)]
pub struct CodeWriter {
    bytes: Vec<u8>,
    branch_overflows: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_op(&mut self, op: Opcode) {
        self.bytes.push(op as u8);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a branch with a reserved operand; returns the operand position
    /// handed back to `patch_branch` once the target is known.
    pub fn emit_branch(&mut self, op: Opcode) -> usize {
        self.write_op(op);
        let operand_pos = self.position();
        self.write_i16(0);
        operand_pos
    }

    /// Write the branch operand at `operand_pos`. A target beyond the i16
    /// reach leaves the reserved zero operand in place and is counted instead
    /// of wrapping; callers check `branch_overflows` after a lowering pass.
    pub fn patch_branch(&mut self, operand_pos: usize, target: usize) {
        match branch_offset(operand_pos, target) {
            Some(offset) => {
                self.bytes[operand_pos..operand_pos + 2].copy_from_slice(&offset.to_le_bytes());
            }
            None => self.branch_overflows += 1,
        }
    }

    /// Number of branches whose target did not fit an i16 operand.
    pub fn branch_overflows(&self) -> usize {
        self.branch_overflows
    }

    /// Emit a branch whose target is already known.
    pub fn emit_branch_to(&mut self, op: Opcode, target: usize) {
        let operand_pos = self.emit_branch(op);
        self.patch_branch(operand_pos, target);
    }
}

/// Forward cursor over a code section.
pub struct CodeReader<'a> {
    code: &'a [u8],
    pc: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8], pc: usize) -> Self {
        Self { code, pc }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    pub fn at_end(&self) -> bool {
        self.pc >= self.code.len()
    }

    pub fn read_opcode(&mut self) -> Result<Opcode, UnknownOpcode> {
        let byte = self.read_u8();
        Opcode::try_from(byte)
    }

    pub fn read_u8(&mut self) -> u8 {
        let byte = self.code.get(self.pc).copied().unwrap_or(0);
        self.pc += 1;
        byte
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes([self.read_u8(), self.read_u8()])
    }

    pub fn read_i16(&mut self) -> i16 {
        i16::from_le_bytes([self.read_u8(), self.read_u8()])
    }

    pub fn read_f32(&mut self) -> f32 {
        f32::from_le_bytes([
            self.read_u8(),
            self.read_u8(),
            self.read_u8(),
            self.read_u8(),
        ])
    }

    /// Read a branch operand and return the resolved absolute target.
    pub fn read_branch_target(&mut self) -> usize {
        let operand_pos = self.pc;
        let offset = self.read_i16();
        branch_target(operand_pos, offset)
    }
}
