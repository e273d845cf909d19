use std::collections::HashMap;

use crate::ast::{
    AssignmentOperator, BinaryOperator, Block, Expr, SourceFileSyntax, Statement, SubroutineDecl,
    SubroutineKind, UnaryOperator,
};
use crate::bytecode::module::{DialogueBlockRecord, NsxModule, SubroutineRecord};
use crate::bytecode::{BinaryOp, CodeWriter, Opcode, imm_tag};
use crate::bytecode::globals::GlobalsTable;
use crate::compiler::IncludedModule;
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::tokenizer::{Position, Sigil};
use crate::vm::builtins::{self, BuiltinFunction};

/// Lower one checked source file to a compiled module. Name resolution and
/// emission run in a single pass; unresolvable names produce an error
/// diagnostic and a null load so emission always finishes.
pub(crate) fn emit_module(
    file: &SourceFileSyntax,
    module_name: &str,
    mtime: i64,
    includes: &[IncludedModule],
    globals: &mut GlobalsTable,
    diagnostics: &mut DiagnosticBag,
) -> NsxModule {
    // Module layout fixes the subroutine order: chapters, scenes, functions.
    let mut ordered: Vec<&SubroutineDecl> = Vec::with_capacity(file.subroutines.len());
    for kind in [
        SubroutineKind::Chapter,
        SubroutineKind::Scene,
        SubroutineKind::Function,
    ] {
        ordered.extend(file.subroutines.iter().filter(|s| s.kind == kind));
    }

    let mut locals = HashMap::new();
    for (index, sub) in ordered.iter().enumerate() {
        if locals
            .insert(sub.name.clone(), (index as u16, sub.kind))
            .is_some()
        {
            diagnostics.report(
                Diagnostic::error(format!("duplicate subroutine name `{}`", sub.name))
                    .in_file(file.file_name.clone())
                    .at(sub.position),
            );
        }
    }
    let local_params: HashMap<String, Vec<String>> = ordered
        .iter()
        .map(|s| (s.name.clone(), s.parameters.clone()))
        .collect();

    let mut emitter = Emitter {
        globals,
        diagnostics,
        file_name: &file.file_name,
        includes,
        locals,
        local_params,
        writer: CodeWriter::new(),
        strings: Vec::new(),
        string_index: HashMap::new(),
        imports: Vec::new(),
        import_index: HashMap::new(),
        breaks: Vec::new(),
        current_sub: None,
        block_records: Vec::new(),
    };

    let mut records = Vec::with_capacity(ordered.len());
    for sub in &ordered {
        records.push(emitter.emit_subroutine(sub));
    }

    NsxModule {
        name: module_name.to_string(),
        mtime,
        subroutines: records,
        imports: emitter.imports,
        strings: emitter.strings,
        code: emitter.writer.into_bytes(),
    }
}

struct Emitter<'a> {
    globals: &'a mut GlobalsTable,
    diagnostics: &'a mut DiagnosticBag,
    file_name: &'a str,
    includes: &'a [IncludedModule],
    locals: HashMap<String, (u16, SubroutineKind)>,
    local_params: HashMap<String, Vec<String>>,
    writer: CodeWriter,
    strings: Vec<String>,
    string_index: HashMap<String, u16>,
    imports: Vec<String>,
    import_index: HashMap<String, u16>,
    /// One patch list per enclosing loop; `break` lands in the innermost.
    breaks: Vec<Vec<usize>>,
    current_sub: Option<&'a SubroutineDecl>,
    block_records: Vec<DialogueBlockRecord>,
}

impl<'a> Emitter<'a> {
    fn emit_subroutine(&mut self, sub: &'a SubroutineDecl) -> SubroutineRecord {
        let offset = self.writer.position() as u32;
        let overflows_before = self.writer.branch_overflows();
        self.current_sub = Some(sub);
        self.block_records = Vec::new();
        self.emit_block(&sub.body);
        // Implicit return for bodies that run off the end.
        self.writer.write_op(Opcode::Return);
        if self.writer.branch_overflows() > overflows_before {
            self.error(
                format!("`{}` is too large: branch target out of range", sub.name),
                sub.position,
            );
        }
        SubroutineRecord {
            kind: sub.kind,
            name: sub.name.clone(),
            offset,
            dialogue_blocks: std::mem::take(&mut self.block_records),
            parameters: sub.parameters.clone(),
        }
    }

    // ----- statements -------------------------------------------------------

    fn emit_block(&mut self, block: &Block) {
        for statement in &block.statements {
            self.emit_statement(statement);
        }
    }

    fn emit_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Block(block) => self.emit_block(block),
            Statement::Expression { expr, .. } => {
                if self.emit_expr(expr) {
                    self.writer.write_op(Opcode::Pop);
                }
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.emit_value(condition);
                let to_else = self.writer.emit_branch(Opcode::JumpIfFalse);
                self.emit_block(then_branch);
                match else_branch {
                    Some(else_branch) => {
                        let to_end = self.writer.emit_branch(Opcode::Jump);
                        let else_target = self.writer.position();
                        self.writer.patch_branch(to_else, else_target);
                        self.emit_block(else_branch);
                        let end = self.writer.position();
                        self.writer.patch_branch(to_end, end);
                    }
                    None => {
                        let end = self.writer.position();
                        self.writer.patch_branch(to_else, end);
                    }
                }
            }
            Statement::While { condition, body } => {
                let top = self.writer.position();
                self.emit_value(condition);
                let exit = self.writer.emit_branch(Opcode::JumpIfFalse);
                self.breaks.push(Vec::new());
                self.emit_block(body);
                self.writer.emit_branch_to(Opcode::Jump, top);
                let end = self.writer.position();
                self.writer.patch_branch(exit, end);
                for patch in self.breaks.pop().unwrap_or_default() {
                    self.writer.patch_branch(patch, end);
                }
            }
            Statement::Break { position } => {
                let patch = self.writer.emit_branch(Opcode::Jump);
                match self.breaks.last_mut() {
                    Some(list) => list.push(patch),
                    None => self.error("`break` outside of a loop", *position),
                }
            }
            Statement::Return { .. } => self.writer.write_op(Opcode::Return),
            Statement::Select { cases } => self.emit_select(cases),
            Statement::DialogueBlock { block_index, lines } => {
                self.emit_dialogue_block(*block_index, lines);
            }
            Statement::CallChapter {
                module, target, ..
            } => self.emit_far_call(Opcode::CallFar, module.as_deref(), target),
            Statement::CallScene {
                module, target, ..
            } => self.emit_far_call(Opcode::CallScene, module.as_deref(), target),
        }
    }

    /// The select polling loop. Every case probes its choice once per pass;
    /// a pressed case runs and exits, an idle pass yields at SelectEnd and
    /// polls again next tick.
    fn emit_select(&mut self, cases: &[crate::ast::SelectCase]) {
        let start = self.writer.position();
        self.writer.write_op(Opcode::SelectStart);
        let mut exits = Vec::with_capacity(cases.len());
        for case in cases {
            let token = self.intern(&case.choice);
            self.writer.write_op(Opcode::GetSelChoice);
            self.writer.write_u16(token);
            let skip = self.writer.emit_branch(Opcode::JumpIfFalse);
            self.emit_block(&case.body);
            exits.push(self.writer.emit_branch(Opcode::Jump));
            let next = self.writer.position();
            self.writer.patch_branch(skip, next);
        }
        self.writer.write_op(Opcode::SelectEnd);
        self.writer.emit_branch_to(Opcode::JumpIfFalse, start);
        let end = self.writer.position();
        for patch in exits {
            self.writer.patch_branch(patch, end);
        }
    }

    fn emit_dialogue_block(&mut self, block_index: usize, lines: &[String]) {
        let Some(sub) = self.current_sub else {
            return;
        };
        let decl = &sub.dialogue_blocks[block_index];
        self.block_records.push(DialogueBlockRecord {
            offset: self.writer.position() as u32,
            box_name: decl.box_name.clone(),
            name: decl.name.clone(),
        });
        self.writer.write_op(Opcode::ActivateBlock);
        self.writer.write_u16(block_index as u16);
        for line in lines {
            let token = self.intern(line);
            self.writer.write_op(Opcode::AppendDialogue);
            self.writer.write_u16(token);
            self.writer.write_op(Opcode::LineEnd);
        }
    }

    /// `call_chapter` / `call_scene` target both other modules and the
    /// current one; the reserved import token keeps the call local.
    fn emit_far_call(&mut self, op: Opcode, module: Option<&str>, target: &str) {
        let import = match module {
            Some(name) => self.intern_import(name),
            None => match self.find_include(target) {
                Some(include) => include,
                None => u16::MAX,
            },
        };
        let token = self.intern(target);
        self.writer.write_op(op);
        self.writer.write_u16(import);
        self.writer.write_u16(token);
    }

    /// Import token of the include exporting `target`, if any.
    fn find_include(&mut self, target: &str) -> Option<u16> {
        let name = self
            .includes
            .iter()
            .find(|include| include.subroutines.iter().any(|s| s == target))?
            .name
            .clone();
        Some(self.intern_import(&name))
    }

    // ----- expressions ------------------------------------------------------

    /// Emit `expr`, then guarantee one value on the stack even for
    /// expressions that produce none.
    fn emit_value(&mut self, expr: &Expr) {
        if !self.emit_expr(expr) {
            self.emit_imm_null();
        }
    }

    /// Emit `expr`; the return value says whether it left a value on the
    /// stack. Assignments and subroutine calls do not.
    fn emit_expr(&mut self, expr: &Expr) -> bool {
        match expr {
            Expr::NullLiteral => {
                self.emit_imm_null();
                true
            }
            Expr::BooleanLiteral(value) => {
                self.writer.write_op(Opcode::LoadImm);
                self.writer
                    .write_u8(if *value { imm_tag::TRUE } else { imm_tag::FALSE });
                true
            }
            Expr::NumberLiteral(value) => {
                self.writer.write_op(Opcode::LoadImm);
                self.writer.write_u8(imm_tag::NUMBER);
                self.writer.write_f32(*value);
                true
            }
            Expr::DeltaLiteral(value) => {
                self.writer.write_op(Opcode::LoadImm);
                self.writer.write_u8(imm_tag::DELTA);
                self.writer.write_f32(*value);
                true
            }
            Expr::StringLiteral(text) => {
                self.emit_imm_string(text);
                true
            }
            Expr::Name {
                text,
                sigil,
                position,
            } => {
                self.emit_name(text, *sigil, *position);
                true
            }
            Expr::Parameter { name, .. } => {
                let slot = self.globals.get_or_insert(name);
                self.writer.write_op(Opcode::LoadVar);
                self.writer.write_u16(slot);
                true
            }
            Expr::Unary { operator, operand } => {
                self.emit_value(operand);
                self.writer.write_op(match operator {
                    UnaryOperator::Minus => Opcode::Neg,
                    UnaryOperator::Not => Opcode::Not,
                    UnaryOperator::Delta => Opcode::Delta,
                });
                true
            }
            Expr::Binary {
                operator,
                left,
                right,
            } => {
                self.emit_value(left);
                self.emit_value(right);
                match operator {
                    BinaryOperator::Equals => self.writer.write_op(Opcode::Equal),
                    BinaryOperator::NotEquals => self.writer.write_op(Opcode::NotEqual),
                    other => {
                        self.writer.write_op(Opcode::Binary);
                        self.writer.write_u8(binary_op(*other) as u8);
                    }
                }
                true
            }
            Expr::Assignment {
                operator,
                target,
                value,
                position,
            } => {
                self.emit_assignment(*operator, target, value.as_deref(), *position);
                false
            }
            Expr::Call {
                callee,
                module,
                arguments,
                position,
            } => self.emit_call(callee, module.as_deref(), arguments, *position),
            Expr::BezierCurve { segments } => {
                self.writer.write_op(Opcode::BezierStart);
                for segment in segments {
                    for (x, y) in &segment.points {
                        self.emit_value(x);
                        self.emit_value(y);
                    }
                    self.writer.write_op(Opcode::BezierSegment);
                }
                self.writer.write_op(Opcode::BezierEnd);
                true
            }
        }
    }

    fn emit_name(&mut self, text: &str, sigil: Sigil, position: Position) {
        match sigil {
            // Variables and flags share one global namespace, keyed by their
            // sigil-spelled name.
            Sigil::Dollar | Sigil::Hash => {
                let slot = self.globals.get_or_insert(text);
                self.writer.write_op(Opcode::LoadVar);
                self.writer.write_u16(slot);
            }
            // `@name` entity aliases and `->block` references reach built-ins
            // as their textual spelling.
            Sigil::At => self.emit_imm_string(text),
            Sigil::Arrow => {
                let name = text.strip_prefix("->").unwrap_or(text).to_string();
                self.emit_imm_string(&name);
            }
            Sigil::None => match builtins::lookup_constant(text) {
                Some(constant) => {
                    self.writer.write_op(Opcode::LoadImm);
                    self.writer.write_u8(imm_tag::BUILTIN_CONST);
                    self.writer.write_u16(constant as u16);
                }
                None => {
                    self.error(format!("unresolved name `{text}`"), position);
                    self.emit_imm_null();
                }
            },
        }
    }

    fn emit_assignment(
        &mut self,
        operator: AssignmentOperator,
        target: &Expr,
        value: Option<&Expr>,
        position: Position,
    ) {
        let slot = match target {
            Expr::Name {
                text,
                sigil: Sigil::Dollar | Sigil::Hash,
                ..
            } => self.globals.get_or_insert(text),
            Expr::Parameter { name, .. } => self.globals.get_or_insert(name),
            _ => {
                self.error("assignment target must be a variable", position);
                if let Some(value) = value {
                    if self.emit_expr(value) {
                        self.writer.write_op(Opcode::Pop);
                    }
                }
                return;
            }
        };
        match operator {
            AssignmentOperator::Assign => {
                self.emit_value(value.expect("parser supplies a value for `=`"));
            }
            AssignmentOperator::Increment | AssignmentOperator::Decrement => {
                self.writer.write_op(Opcode::LoadVar);
                self.writer.write_u16(slot);
                self.writer.write_op(Opcode::LoadImm);
                self.writer.write_u8(imm_tag::NUMBER);
                self.writer.write_f32(1.0);
                self.writer.write_op(Opcode::Binary);
                let op = if operator == AssignmentOperator::Increment {
                    BinaryOp::Add
                } else {
                    BinaryOp::Subtract
                };
                self.writer.write_u8(op as u8);
            }
            compound => {
                self.writer.write_op(Opcode::LoadVar);
                self.writer.write_u16(slot);
                self.emit_value(value.expect("parser supplies a value for compound assignment"));
                self.writer.write_op(Opcode::Binary);
                let op = match compound {
                    AssignmentOperator::AddAssign => BinaryOp::Add,
                    AssignmentOperator::SubtractAssign => BinaryOp::Subtract,
                    AssignmentOperator::MultiplyAssign => BinaryOp::Multiply,
                    AssignmentOperator::DivideAssign => BinaryOp::Divide,
                    _ => unreachable!("simple forms handled above"),
                };
                self.writer.write_u8(op as u8);
            }
        }
        self.writer.write_op(Opcode::StoreVar);
        self.writer.write_u16(slot);
    }

    /// Resolution order for a bare call: local subroutine, included
    /// subroutine, built-in. Explicit `module->target(...)` skips straight
    /// to a far call.
    fn emit_call(
        &mut self,
        callee: &str,
        module: Option<&str>,
        arguments: &[Expr],
        position: Position,
    ) -> bool {
        if let Some(module) = module {
            if !arguments.is_empty() {
                self.error("far calls do not take arguments", position);
            }
            self.emit_far_call(Opcode::CallFar, Some(module), callee);
            return false;
        }

        if let Some((index, _)) = self.locals.get(callee).copied() {
            let parameters = self.local_params.get(callee).cloned().unwrap_or_default();
            if arguments.len() != parameters.len() {
                self.error(
                    format!(
                        "`{callee}` takes {} argument(s), {} given",
                        parameters.len(),
                        arguments.len()
                    ),
                    position,
                );
            }
            // Arguments travel through the callee's parameter slots.
            for (argument, parameter) in arguments.iter().zip(&parameters) {
                self.emit_value(argument);
                let slot = self.globals.get_or_insert(parameter);
                self.writer.write_op(Opcode::StoreVar);
                self.writer.write_u16(slot);
            }
            self.writer.write_op(Opcode::Call);
            self.writer.write_u16(index);
            return false;
        }

        if self.find_include(callee).is_some() {
            if !arguments.is_empty() {
                self.error("far calls do not take arguments", position);
            }
            self.emit_far_call(Opcode::CallFar, None, callee);
            return false;
        }

        match builtins::lookup_builtin(callee) {
            Some(builtin) => {
                self.emit_builtin_call(builtin, arguments);
                true
            }
            None => {
                self.error(format!("unresolved call target `{callee}`"), position);
                self.emit_imm_null();
                true
            }
        }
    }

    fn emit_builtin_call(&mut self, builtin: BuiltinFunction, arguments: &[Expr]) {
        for (index, argument) in arguments.iter().enumerate() {
            // The first argument names an entity; a bare word there is the
            // entity's name even when it collides with a constant.
            match argument {
                Expr::Name {
                    text,
                    sigil: Sigil::None,
                    ..
                } if index == 0 => self.emit_imm_string(text),
                other => self.emit_value(other),
            }
        }
        self.writer.write_op(Opcode::Dispatch);
        self.writer.write_u16(builtin as u16);
        self.writer.write_u8(arguments.len() as u8);
    }

    // ----- small helpers ----------------------------------------------------

    fn emit_imm_null(&mut self) {
        self.writer.write_op(Opcode::LoadImm);
        self.writer.write_u8(imm_tag::NULL);
    }

    fn emit_imm_string(&mut self, text: &str) {
        let token = self.intern(text);
        self.writer.write_op(Opcode::LoadImm);
        self.writer.write_u8(imm_tag::STRING);
        self.writer.write_u16(token);
    }

    fn intern(&mut self, text: &str) -> u16 {
        if let Some(token) = self.string_index.get(text) {
            return *token;
        }
        let token = self.strings.len() as u16;
        self.strings.push(text.to_string());
        self.string_index.insert(text.to_string(), token);
        token
    }

    fn intern_import(&mut self, name: &str) -> u16 {
        if let Some(token) = self.import_index.get(name) {
            return *token;
        }
        let token = self.imports.len() as u16;
        self.imports.push(name.to_string());
        self.import_index.insert(name.to_string(), token);
        token
    }

    fn error(&mut self, message: impl Into<String>, position: Position) {
        self.diagnostics.report(
            Diagnostic::error(message)
                .in_file(self.file_name.to_string())
                .at(position),
        );
    }
}

fn binary_op(operator: BinaryOperator) -> BinaryOp {
    match operator {
        BinaryOperator::Add => BinaryOp::Add,
        BinaryOperator::Subtract => BinaryOp::Subtract,
        BinaryOperator::Multiply => BinaryOp::Multiply,
        BinaryOperator::Divide => BinaryOp::Divide,
        BinaryOperator::Remainder => BinaryOp::Remainder,
        BinaryOperator::Less => BinaryOp::Less,
        BinaryOperator::LessOrEqual => BinaryOp::LessOrEqual,
        BinaryOperator::Greater => BinaryOp::Greater,
        BinaryOperator::GreaterOrEqual => BinaryOp::GreaterOrEqual,
        BinaryOperator::And => BinaryOp::And,
        BinaryOperator::Or => BinaryOp::Or,
        BinaryOperator::Equals | BinaryOperator::NotEquals => {
            unreachable!("equality has dedicated opcodes")
        }
    }
}
