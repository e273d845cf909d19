use std::collections::VecDeque;
use std::rc::Rc;

use crate::bytecode::{CodeReader, NsxModule, Opcode, imm_tag};
use crate::vm::builtins::{self, ArgReader, BuiltinFunction, EngineCallbacks};
use crate::vm::scheduler::{
    CallFrame, ProcessRequest, ScriptThread, ThreadAction, ThreadId,
};
use crate::vm::value::{self, CompositeBezier, CubicSegment, Value};
use crate::vm::{GlobalStore, ModuleLoader, VmError};

/// What one instruction told the slice loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    Yield,
    Finished,
}

/// Everything a running slice may touch besides its own thread. Borrowed
/// disjointly from the process and the VM so the thread set itself is never
/// aliased while a thread runs.
pub(crate) struct InterpContext<'a> {
    pub globals: &'a mut GlobalStore,
    pub engine: &'a mut dyn EngineCallbacks,
    pub modules: &'a mut ModuleLoader,
    pub actions: &'a mut VecDeque<ThreadAction>,
    /// Id and name of every thread in the process at the start of the pass.
    pub peers: &'a [(ThreadId, String)],
    pub process_requests: &'a mut Vec<ProcessRequest>,
    pub next_thread_id: &'a mut u32,
    pub trace: bool,
}

impl InterpContext<'_> {
    fn alloc_thread_id(&mut self) -> ThreadId {
        let id = ThreadId(*self.next_thread_id);
        *self.next_thread_id += 1;
        id
    }
}

/// Run `thread` until it yields, finishes, or faults.
pub(crate) fn run_slice(
    thread: &mut ScriptThread,
    ctx: &mut InterpContext<'_>,
) -> Result<(), VmError> {
    loop {
        match execute_one(thread, ctx)? {
            Step::Continue => {}
            Step::Yield => {
                thread.yielded = true;
                return Ok(());
            }
            Step::Finished => {
                thread.done = true;
                return Ok(());
            }
        }
    }
}

fn execute_one(thread: &mut ScriptThread, ctx: &mut InterpContext<'_>) -> Result<Step, VmError> {
    let Some(frame) = thread.frames.last() else {
        return Ok(Step::Finished);
    };
    let module = frame.module.clone();
    let subroutine = frame.subroutine;
    let mut reader = CodeReader::new(&module.code, frame.pc);
    if reader.at_end() {
        thread.frames.pop();
        return Ok(if thread.frames.is_empty() {
            Step::Finished
        } else {
            Step::Continue
        });
    }

    let pc = reader.pc();
    let opcode = reader.read_opcode()?;
    if ctx.trace {
        eprintln!("[vm] thread {} {:06} {}", thread.id.0, pc, opcode.name());
    }

    let step = match opcode {
        Opcode::Nop => Step::Continue,
        Opcode::LoadImm => {
            let value = read_immediate(&module, &mut reader)?;
            thread.stack.push(value);
            Step::Continue
        }
        Opcode::LoadVar => {
            let slot = reader.read_u16();
            thread.stack.push(ctx.globals.get(slot));
            Step::Continue
        }
        Opcode::StoreVar => {
            let slot = reader.read_u16();
            let value = pop(thread, pc)?;
            ctx.globals.set(slot, value);
            Step::Continue
        }
        Opcode::Binary => {
            let op = reader.read_u8().try_into()?;
            let rhs = pop(thread, pc)?;
            let lhs = pop(thread, pc)?;
            thread.stack.push(value::apply_binary(op, &lhs, &rhs)?);
            Step::Continue
        }
        Opcode::Equal => {
            let rhs = pop(thread, pc)?;
            let lhs = pop(thread, pc)?;
            thread.stack.push(Value::boolean(value::values_equal(&lhs, &rhs)));
            Step::Continue
        }
        Opcode::NotEqual => {
            let rhs = pop(thread, pc)?;
            let lhs = pop(thread, pc)?;
            thread
                .stack
                .push(Value::boolean(!value::values_equal(&lhs, &rhs)));
            Step::Continue
        }
        Opcode::Neg => {
            let operand = pop(thread, pc)?;
            thread.stack.push(value::negate(&operand)?);
            Step::Continue
        }
        Opcode::Not => {
            let operand = pop(thread, pc)?;
            thread.stack.push(value::logical_not(&operand));
            Step::Continue
        }
        Opcode::Delta => {
            let operand = pop(thread, pc)?;
            thread.stack.push(value::to_delta(&operand)?);
            Step::Continue
        }
        Opcode::Jump => {
            let target = reader.read_branch_target();
            reader.set_pc(target);
            Step::Continue
        }
        Opcode::JumpIfTrue => {
            let target = reader.read_branch_target();
            if pop(thread, pc)?.is_truthy() {
                reader.set_pc(target);
            }
            Step::Continue
        }
        Opcode::JumpIfFalse => {
            let target = reader.read_branch_target();
            if !pop(thread, pc)?.is_truthy() {
                reader.set_pc(target);
            }
            Step::Continue
        }
        Opcode::Call => {
            let index = reader.read_u16();
            let sub = module
                .subroutines
                .get(index as usize)
                .ok_or_else(|| VmError::SubroutineNotFound {
                    module: module.name.clone(),
                    target: format!("#{index}"),
                })?;
            let entry = CallFrame {
                module: module.clone(),
                subroutine: index,
                pc: sub.offset as usize,
            };
            set_pc(thread, reader.pc());
            thread.frames.push(entry);
            return Ok(Step::Yield);
        }
        Opcode::CallFar => {
            let entry = read_far_target(&module, &mut reader, ctx)?;
            set_pc(thread, reader.pc());
            thread.frames.push(entry);
            return Ok(Step::Yield);
        }
        Opcode::CallScene => {
            let entry = read_far_target(&module, &mut reader, ctx)?;
            let name = entry
                .module
                .subroutines
                .get(entry.subroutine as usize)
                .map(|s| s.name.clone())
                .unwrap_or_default();
            let id = ctx.alloc_thread_id();
            ctx.actions
                .push_back(ThreadAction::Create(ScriptThread::new(id, name, entry)));
            ctx.actions.push_back(ThreadAction::Join {
                waiter: thread.id,
                target: id,
            });
            ctx.actions.push_back(ThreadAction::Suspend {
                id: thread.id,
                timeout: None,
            });
            Step::Yield
        }
        Opcode::Return => {
            thread.frames.pop();
            if thread.frames.is_empty() {
                return Ok(Step::Finished);
            }
            Step::Continue
        }
        Opcode::Dispatch => {
            let id = reader.read_u16();
            let argc = reader.read_u8() as usize;
            let builtin =
                builtins::builtin_from_id(id).ok_or(VmError::UnknownBuiltin(id))?;
            let at = thread
                .stack
                .len()
                .checked_sub(argc)
                .ok_or(VmError::StackUnderflow { pc })?;
            let args: Vec<Value> = thread.stack.split_off(at);
            if ctx.trace {
                eprintln!("[vm] thread {}   {} argc={argc}", thread.id.0, builtin.name());
            }
            let result = if builtin.is_vm_control() {
                dispatch_control(thread, &module, ctx, builtin, &args)?;
                None
            } else {
                builtins::dispatch(ctx.engine, ctx.globals, builtin, &args)?
            };
            thread.stack.push(result.unwrap_or_else(Value::null));
            Step::Yield
        }
        Opcode::ActivateBlock => {
            let index = reader.read_u16();
            let block = module
                .subroutines
                .get(subroutine as usize)
                .and_then(|sub| sub.dialogue_blocks.get(index as usize))
                .ok_or(VmError::BadDialogueBlock(index))?;
            ctx.engine.activate_dialogue_block(&block.box_name, &block.name);
            Step::Yield
        }
        Opcode::AppendDialogue => {
            let token = reader.read_u16();
            let text = module.string(token).ok_or(VmError::BadStringToken(token))?;
            ctx.engine.append_dialogue(text);
            Step::Continue
        }
        Opcode::LineEnd => {
            ctx.engine.dialogue_line_end();
            Step::Yield
        }
        Opcode::SelectStart => {
            thread.select_result = false;
            Step::Continue
        }
        Opcode::GetSelChoice => {
            let token = reader.read_u16();
            let choice = module.string(token).ok_or(VmError::BadStringToken(token))?;
            let pressed = ctx.engine.is_pressed(choice);
            thread.select_result |= pressed;
            thread.stack.push(Value::boolean(pressed));
            Step::Continue
        }
        Opcode::SelectEnd => {
            thread.stack.push(Value::boolean(thread.select_result));
            Step::Yield
        }
        Opcode::BezierStart => {
            thread.bezier.clear();
            Step::Continue
        }
        Opcode::BezierSegment => {
            let mut coords = [0.0f32; 8];
            for i in (0..8).rev() {
                let value = pop(thread, pc)?;
                coords[i] = value
                    .as_number()
                    .ok_or_else(|| VmError::BadBezierPoint {
                        pc,
                        actual: value.kind.kind_name(),
                    })?;
            }
            thread.bezier.push(CubicSegment {
                points: [
                    (coords[0], coords[1]),
                    (coords[2], coords[3]),
                    (coords[4], coords[5]),
                    (coords[6], coords[7]),
                ],
            });
            Step::Continue
        }
        Opcode::BezierEnd => {
            let segments = std::mem::take(&mut thread.bezier);
            thread.stack.push(Value::bezier(CompositeBezier { segments }));
            Step::Continue
        }
        Opcode::Pop => {
            pop(thread, pc)?;
            Step::Continue
        }
    };
    set_pc(thread, reader.pc());
    Ok(step)
}

fn set_pc(thread: &mut ScriptThread, pc: usize) {
    if let Some(frame) = thread.frames.last_mut() {
        frame.pc = pc;
    }
}

fn pop(thread: &mut ScriptThread, pc: usize) -> Result<Value, VmError> {
    thread.stack.pop().ok_or(VmError::StackUnderflow { pc })
}

fn read_immediate(module: &NsxModule, reader: &mut CodeReader<'_>) -> Result<Value, VmError> {
    Ok(match reader.read_u8() {
        imm_tag::NULL => Value::null(),
        imm_tag::TRUE => Value::boolean(true),
        imm_tag::FALSE => Value::boolean(false),
        imm_tag::NUMBER => Value::number(reader.read_f32()),
        imm_tag::DELTA => Value::delta(reader.read_f32()),
        imm_tag::STRING => {
            let token = reader.read_u16();
            let text = module.string(token).ok_or(VmError::BadStringToken(token))?;
            Value::string(text.to_string())
        }
        imm_tag::BUILTIN_CONST => {
            let id = reader.read_u16();
            let constant =
                builtins::constant_from_id(id).ok_or(VmError::UnknownConstant(id))?;
            Value::constant(constant)
        }
        other => return Err(VmError::BadImmediate(other)),
    })
}

/// Decode a far call's (import, name) operand pair and resolve it to an
/// entry frame. Import `u16::MAX` targets the current module.
fn read_far_target(
    module: &Rc<NsxModule>,
    reader: &mut CodeReader<'_>,
    ctx: &mut InterpContext<'_>,
) -> Result<CallFrame, VmError> {
    let import = reader.read_u16();
    let token = reader.read_u16();
    let target = module
        .string(token)
        .ok_or(VmError::BadStringToken(token))?
        .to_string();
    let callee = if import == u16::MAX {
        module.clone()
    } else {
        let name = module
            .import(import)
            .ok_or(VmError::BadImport(import))?
            .to_string();
        ctx.modules.load(&name)?
    };
    let index = callee
        .subroutine_index(&target)
        .ok_or_else(|| VmError::SubroutineNotFound {
            module: callee.name.clone(),
            target,
        })?;
    let pc = callee.subroutines[index as usize].offset as usize;
    Ok(CallFrame {
        module: callee,
        subroutine: index,
        pc,
    })
}

/// Built-ins the scheduler implements itself. Argument shapes are decoded
/// with the same reader the host dispatcher uses, so mismatches report the
/// same way.
fn dispatch_control(
    thread: &mut ScriptThread,
    module: &Rc<NsxModule>,
    ctx: &mut InterpContext<'_>,
    builtin: BuiltinFunction,
    args: &[Value],
) -> Result<(), VmError> {
    let mut reader = ArgReader::new(builtin, args);
    match builtin {
        BuiltinFunction::Wait => {
            let timeout = reader.time_span()?;
            ctx.actions.push_back(ThreadAction::Suspend {
                id: thread.id,
                timeout: Some(timeout),
            });
        }
        BuiltinFunction::WaitKey => {
            let timeout = if reader.remaining() > 0 {
                Some(reader.time_span()?)
            } else {
                None
            };
            ctx.actions.push_back(ThreadAction::Suspend {
                id: thread.id,
                timeout,
            });
        }
        BuiltinFunction::WaitFrame => {
            // Yielding is enough; the thread reruns next tick.
        }
        BuiltinFunction::CreateThread => {
            let name = reader.string()?.to_string();
            let entry = control_entry(module, ctx, reader.string()?)?;
            let id = ctx.alloc_thread_id();
            ctx.actions
                .push_back(ThreadAction::Create(ScriptThread::new(id, name, entry)));
        }
        BuiltinFunction::TerminateThread => {
            let name = reader.string()?;
            if let Some((id, _)) = ctx.peers.iter().find(|(_, n)| n == name) {
                ctx.actions.push_back(ThreadAction::Terminate(*id));
            }
        }
        BuiltinFunction::CreateProcess => {
            let name = reader.string()?.to_string();
            let entry = control_entry(module, ctx, reader.string()?)?;
            ctx.process_requests.push(ProcessRequest::Create { name, entry });
        }
        BuiltinFunction::PauseProcess => {
            let name = reader.string()?.to_string();
            ctx.process_requests.push(ProcessRequest::Pause(name));
        }
        BuiltinFunction::ResumeProcess => {
            let name = reader.string()?.to_string();
            ctx.process_requests.push(ProcessRequest::Resume(name));
        }
        BuiltinFunction::TerminateProcess => {
            let name = reader.string()?.to_string();
            ctx.process_requests.push(ProcessRequest::Terminate(name));
        }
        _ => unreachable!("host built-in routed to the scheduler"),
    }
    Ok(())
}

/// Resolve a `module->subroutine` or bare-subroutine spec for thread and
/// process spawning built-ins.
fn control_entry(
    module: &Rc<NsxModule>,
    ctx: &mut InterpContext<'_>,
    spec: &str,
) -> Result<CallFrame, VmError> {
    let (callee, target) = match spec.split_once("->") {
        Some((module_name, target)) => (ctx.modules.load(module_name)?, target),
        None => (module.clone(), spec),
    };
    let index = callee
        .subroutine_index(target)
        .ok_or_else(|| VmError::SubroutineNotFound {
            module: callee.name.clone(),
            target: target.to_string(),
        })?;
    let pc = callee.subroutines[index as usize].offset as usize;
    Ok(CallFrame {
        module: callee,
        subroutine: index,
        pc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::ast::SubroutineKind;
    use crate::bytecode::module::SubroutineRecord;
    use crate::bytecode::{BinaryOp, CodeWriter};
    use crate::vm::builtins::NullEngine;
    use crate::vm::value::ValueKind;

    fn module_with_code(code: Vec<u8>) -> Rc<NsxModule> {
        Rc::new(NsxModule {
            name: "test".into(),
            mtime: 0,
            subroutines: vec![SubroutineRecord {
                kind: SubroutineKind::Chapter,
                name: "main".into(),
                offset: 0,
                dialogue_blocks: Vec::new(),
                parameters: Vec::new(),
            }],
            imports: Vec::new(),
            strings: Vec::new(),
            code,
        })
    }

    fn run(code: Vec<u8>) -> (ScriptThread, GlobalStore) {
        let module = module_with_code(code);
        let mut thread = ScriptThread::new(
            ThreadId(0),
            "main",
            CallFrame {
                module,
                subroutine: 0,
                pc: 0,
            },
        );
        thread.yielded = false;
        let mut globals = GlobalStore::new();
        let mut engine = NullEngine;
        let mut modules = ModuleLoader::in_memory();
        let mut actions = VecDeque::new();
        let mut requests = Vec::new();
        let mut next = 1;
        let mut ctx = InterpContext {
            globals: &mut globals,
            engine: &mut engine,
            modules: &mut modules,
            actions: &mut actions,
            peers: &[],
            process_requests: &mut requests,
            next_thread_id: &mut next,
            trace: false,
        };
        run_slice(&mut thread, &mut ctx).expect("slice");
        (thread, globals)
    }

    #[test]
    fn countdown_loop_terminates() {
        // $0 = 3; while ($0 > 0) { $0 = $0 - 1; }
        let mut w = CodeWriter::new();
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(3.0);
        w.write_op(Opcode::StoreVar);
        w.write_u16(0);
        let top = w.position();
        w.write_op(Opcode::LoadVar);
        w.write_u16(0);
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(0.0);
        w.write_op(Opcode::Binary);
        w.write_u8(BinaryOp::Greater as u8);
        let exit = w.emit_branch(Opcode::JumpIfFalse);
        w.write_op(Opcode::LoadVar);
        w.write_u16(0);
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(1.0);
        w.write_op(Opcode::Binary);
        w.write_u8(BinaryOp::Subtract as u8);
        w.write_op(Opcode::StoreVar);
        w.write_u16(0);
        w.emit_branch_to(Opcode::Jump, top);
        let end = w.position();
        w.patch_branch(exit, end);
        w.write_op(Opcode::Return);

        let (thread, globals) = run(w.into_bytes());
        assert!(thread.done);
        assert!(thread.stack.is_empty());
        assert_eq!(globals.get(0).as_number(), Some(0.0));
    }

    #[test]
    fn select_end_pushes_accumulated_flag_and_yields() {
        struct OneChoice;
        impl EngineCallbacks for OneChoice {
            fn is_pressed(&mut self, choice: &str) -> bool {
                choice == "yes"
            }
        }

        let mut w = CodeWriter::new();
        w.write_op(Opcode::SelectStart);
        w.write_op(Opcode::GetSelChoice);
        w.write_u16(0);
        w.write_op(Opcode::Pop);
        w.write_op(Opcode::GetSelChoice);
        w.write_u16(1);
        w.write_op(Opcode::Pop);
        w.write_op(Opcode::SelectEnd);

        let module = NsxModule {
            name: "test".into(),
            mtime: 0,
            subroutines: vec![SubroutineRecord {
                kind: SubroutineKind::Chapter,
                name: "main".into(),
                offset: 0,
                dialogue_blocks: Vec::new(),
                parameters: Vec::new(),
            }],
            imports: Vec::new(),
            strings: vec!["no".into(), "yes".into()],
            code: w.into_bytes(),
        };
        let module = Rc::new(module);

        let mut thread = ScriptThread::new(
            ThreadId(0),
            "main",
            CallFrame {
                module,
                subroutine: 0,
                pc: 0,
            },
        );
        thread.yielded = false;
        let mut globals = GlobalStore::new();
        let mut engine = OneChoice;
        let mut modules = ModuleLoader::in_memory();
        let mut actions = VecDeque::new();
        let mut requests = Vec::new();
        let mut next = 1;
        let mut ctx = InterpContext {
            globals: &mut globals,
            engine: &mut engine,
            modules: &mut modules,
            actions: &mut actions,
            peers: &[],
            process_requests: &mut requests,
            next_thread_id: &mut next,
            trace: false,
        };
        run_slice(&mut thread, &mut ctx).expect("slice");

        assert!(thread.yielded);
        assert!(!thread.done);
        assert_eq!(thread.stack.last(), Some(&Value::boolean(true)));
    }

    #[test]
    fn wait_queues_a_timed_suspension() {
        let mut w = CodeWriter::new();
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(250.0);
        w.write_op(Opcode::Dispatch);
        w.write_u16(BuiltinFunction::Wait as u16);
        w.write_u8(1);

        let module = module_with_code(w.into_bytes());
        let mut thread = ScriptThread::new(
            ThreadId(7),
            "main",
            CallFrame {
                module,
                subroutine: 0,
                pc: 0,
            },
        );
        thread.yielded = false;
        let mut globals = GlobalStore::new();
        let mut engine = NullEngine;
        let mut modules = ModuleLoader::in_memory();
        let mut actions = VecDeque::new();
        let mut requests = Vec::new();
        let mut next = 8;
        let mut ctx = InterpContext {
            globals: &mut globals,
            engine: &mut engine,
            modules: &mut modules,
            actions: &mut actions,
            peers: &[],
            process_requests: &mut requests,
            next_thread_id: &mut next,
            trace: false,
        };
        run_slice(&mut thread, &mut ctx).expect("slice");

        assert!(thread.yielded);
        assert!(matches!(
            actions.front(),
            Some(ThreadAction::Suspend {
                id: ThreadId(7),
                timeout: Some(t),
            }) if *t == Duration::from_millis(250)
        ));
    }

    #[test]
    fn bezier_literal_assembles_from_stack() {
        let mut w = CodeWriter::new();
        w.write_op(Opcode::BezierStart);
        for i in 0..8 {
            w.write_op(Opcode::LoadImm);
            w.write_u8(imm_tag::NUMBER);
            w.write_f32(i as f32);
        }
        w.write_op(Opcode::BezierSegment);
        w.write_op(Opcode::BezierEnd);
        w.write_op(Opcode::Return);

        let (thread, _) = run(w.into_bytes());
        assert!(thread.done);
        // Return leaves the curve on the stack.
        match &thread.stack.last().unwrap().kind {
            ValueKind::Bezier(curve) => {
                assert_eq!(curve.segments.len(), 1);
                assert_eq!(curve.segments[0].points[3], (6.0, 7.0));
            }
            other => panic!("expected bezier, got {}", other.kind_name()),
        }
    }
}
