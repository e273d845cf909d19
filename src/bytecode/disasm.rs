use serde::Serialize;
use std::fmt;

use super::module::NsxModule;
use super::{BinaryOp, CodeReader, Opcode, UnknownOpcode, imm_tag};
use crate::vm::builtins::builtin_name;

/// One decoded instruction, for tooling and tests.
#[derive(Debug, Clone, Serialize)]
pub struct DisasmLine {
    pub offset: usize,
    pub mnemonic: &'static str,
    pub operands: String,
    /// Resolved absolute target for branch instructions.
    pub target: Option<usize>,
}

impl fmt::Display for DisasmLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06} {}", self.offset, self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands)?;
        }
        if let Some(target) = self.target {
            write!(f, " -> {target:06}")?;
        }
        Ok(())
    }
}

/// Disassemble one subroutine's code, stopping at the next subroutine's
/// offset (or the end of the code section for the last one).
pub fn disassemble_subroutine(
    module: &NsxModule,
    index: usize,
) -> Result<Vec<DisasmLine>, UnknownOpcode> {
    let start = match module.subroutines.get(index) {
        Some(sub) => sub.offset as usize,
        None => return Ok(Vec::new()),
    };
    let end = module
        .subroutines
        .iter()
        .map(|s| s.offset as usize)
        .filter(|offset| *offset > start)
        .min()
        .unwrap_or(module.code.len());
    disassemble_range(module, start, end)
}

pub fn disassemble_range(
    module: &NsxModule,
    start: usize,
    end: usize,
) -> Result<Vec<DisasmLine>, UnknownOpcode> {
    let mut reader = CodeReader::new(&module.code, start);
    let mut lines = Vec::new();
    while reader.pc() < end && !reader.at_end() {
        lines.push(decode_one(module, &mut reader)?);
    }
    Ok(lines)
}

fn decode_one(module: &NsxModule, reader: &mut CodeReader<'_>) -> Result<DisasmLine, UnknownOpcode> {
    let offset = reader.pc();
    let opcode = reader.read_opcode()?;
    let mut operands = String::new();
    let mut target = None;
    match opcode {
        Opcode::LoadImm => operands = decode_immediate(module, reader),
        Opcode::LoadVar | Opcode::StoreVar => {
            operands = format!("slot {}", reader.read_u16());
        }
        Opcode::Binary => {
            let op = BinaryOp::try_from(reader.read_u8())?;
            operands = op.name().to_string();
        }
        Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
            target = Some(reader.read_branch_target());
        }
        Opcode::Call => {
            let index = reader.read_u16();
            let name = module
                .subroutines
                .get(index as usize)
                .map(|s| s.name.as_str())
                .unwrap_or("?");
            operands = format!("{index} ({name})");
        }
        Opcode::CallFar | Opcode::CallScene => {
            let import = reader.read_u16();
            let name_token = reader.read_u16();
            let module_name = if import == u16::MAX {
                "<local>"
            } else {
                module.import(import).unwrap_or("?")
            };
            let name = module.string(name_token).unwrap_or("?");
            operands = format!("{module_name}->{name}");
        }
        Opcode::Dispatch => {
            let id = reader.read_u16();
            let argc = reader.read_u8();
            operands = format!("{} argc={argc}", builtin_name(id).unwrap_or("?"));
        }
        Opcode::ActivateBlock => {
            operands = format!("block {}", reader.read_u16());
        }
        Opcode::AppendDialogue | Opcode::GetSelChoice => {
            let token = reader.read_u16();
            operands = format!("\"{}\"", module.string(token).unwrap_or("?"));
        }
        _ => {}
    }
    Ok(DisasmLine {
        offset,
        mnemonic: opcode.name(),
        operands,
        target,
    })
}

fn decode_immediate(module: &NsxModule, reader: &mut CodeReader<'_>) -> String {
    match reader.read_u8() {
        imm_tag::NULL => "null".to_string(),
        imm_tag::TRUE => "true".to_string(),
        imm_tag::FALSE => "false".to_string(),
        imm_tag::NUMBER => format!("{}", reader.read_f32()),
        imm_tag::DELTA => format!("@{}", reader.read_f32()),
        imm_tag::STRING => {
            let token = reader.read_u16();
            format!("\"{}\"", module.string(token).unwrap_or("?"))
        }
        imm_tag::BUILTIN_CONST => format!("const {}", reader.read_u16()),
        other => format!("<bad imm tag {other}>"),
    }
}
