//! The cooperative bytecode virtual machine: processes of script threads
//! stepped in discrete ticks, a shared global variable store, and the
//! built-in dispatch boundary to the host engine.

pub mod builtins;
mod interpreter;
pub mod scheduler;
pub mod value;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

use crate::bytecode::{NsxError, NsxModule, UnknownOpcode};
pub use builtins::{DispatchError, EngineCallbacks, NullEngine};
use interpreter::InterpContext;
pub use scheduler::{ProcessId, ThreadId};
use scheduler::{
    CallFrame, Process, ProcessRequest, ScriptThread, ThreadAction, TickOutcome,
};
pub use value::Value;
use value::ArithmeticError;

#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error(transparent)]
    Module(#[from] NsxError),
    #[error(transparent)]
    BadOpcode(#[from] UnknownOpcode),
    #[error("module `{0}` not found")]
    ModuleNotFound(String),
    #[error("no subroutine `{target}` in module `{module}`")]
    SubroutineNotFound { module: String, target: String },
    #[error("no dialogue block `{0}`")]
    DialogueBlockNotFound(String),
    #[error("value stack underflow at {pc:06}")]
    StackUnderflow { pc: usize },
    #[error("bad immediate tag {0}")]
    BadImmediate(u8),
    #[error("string token {0} out of range")]
    BadStringToken(u16),
    #[error("import token {0} out of range")]
    BadImport(u16),
    #[error("unknown built-in id {0}")]
    UnknownBuiltin(u16),
    #[error("unknown built-in constant id {0}")]
    UnknownConstant(u16),
    #[error("dialogue block index {0} out of range")]
    BadDialogueBlock(u16),
    #[error("non-numeric bezier point ({actual}) at {pc:06}")]
    BadBezierPoint { pc: usize, actual: &'static str },
}

#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    /// Print one line per executed instruction to stderr.
    pub trace: bool,
}

/// Thread churn observed during one tick, across all processes.
#[derive(Debug, Default)]
pub struct TickReport {
    pub new: Vec<ThreadId>,
    pub terminated: Vec<ThreadId>,
}

/// Global variable storage, indexed by the slots the compiler assigned.
/// Slots materialize on first access as `0`.
#[derive(Debug, Default)]
pub struct GlobalStore {
    values: Vec<Value>,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a slot. The returned value carries the slot tag so built-ins can
    /// write back through it.
    pub fn get(&self, slot: u16) -> Value {
        self.values
            .get(slot as usize)
            .cloned()
            .unwrap_or_else(|| Value::number(0.0))
            .from_slot(slot)
    }

    pub fn set(&mut self, slot: u16, value: Value) {
        let index = slot as usize;
        if index >= self.values.len() {
            self.values.resize(index + 1, Value::number(0.0));
        }
        self.values[index] = Value {
            kind: value.kind,
            slot: None,
        };
    }
}

/// Lazy module cache. Modules load on first reference; file lookup ignores
/// case because script sources freely mix spellings of module names.
#[derive(Debug)]
pub struct ModuleLoader {
    root: Option<PathBuf>,
    cache: HashMap<String, Rc<NsxModule>>,
}

impl ModuleLoader {
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root: Some(root),
            cache: HashMap::new(),
        }
    }

    /// A loader that only ever serves preloaded modules.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            cache: HashMap::new(),
        }
    }

    pub fn insert(&mut self, module: NsxModule) -> Rc<NsxModule> {
        let key = normalize_module_name(&module.name);
        let module = Rc::new(module);
        self.cache.insert(key, module.clone());
        module
    }

    pub fn load(&mut self, name: &str) -> Result<Rc<NsxModule>, VmError> {
        let key = normalize_module_name(name);
        if let Some(module) = self.cache.get(&key) {
            return Ok(module.clone());
        }
        let Some(root) = &self.root else {
            return Err(VmError::ModuleNotFound(name.to_string()));
        };
        for entry in fs::read_dir(root).map_err(NsxError::from)? {
            let path = entry.map_err(NsxError::from)?.path();
            let is_nsx = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("nsx"));
            let stem_matches = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.eq_ignore_ascii_case(&key));
            if is_nsx && stem_matches {
                let file = fs::File::open(&path).map_err(NsxError::from)?;
                let module = NsxModule::read_from(file, &key)?;
                return Ok(self.insert(module));
            }
        }
        Err(VmError::ModuleNotFound(name.to_string()))
    }
}

/// Module names compare without case or a `.nss`/`.nsx` extension.
fn normalize_module_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    lower
        .strip_suffix(".nsx")
        .or_else(|| lower.strip_suffix(".nss"))
        .unwrap_or(&lower)
        .to_string()
}

pub struct Vm {
    options: VmOptions,
    globals: GlobalStore,
    modules: ModuleLoader,
    processes: Vec<Process>,
    next_thread_id: u32,
    next_process_id: u32,
}

impl Vm {
    pub fn new(options: VmOptions) -> Self {
        Self::with_loader(ModuleLoader::in_memory(), options)
    }

    /// A VM that loads compiled modules from `root` on demand.
    pub fn with_module_root(root: PathBuf, options: VmOptions) -> Self {
        Self::with_loader(ModuleLoader::with_root(root), options)
    }

    fn with_loader(modules: ModuleLoader, options: VmOptions) -> Self {
        Self {
            options,
            globals: GlobalStore::new(),
            modules,
            processes: Vec::new(),
            next_thread_id: 0,
            next_process_id: 0,
        }
    }

    pub fn add_module(&mut self, module: NsxModule) {
        self.modules.insert(module);
    }

    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalStore {
        &mut self.globals
    }

    pub fn has_live_threads(&self) -> bool {
        self.processes.iter().any(Process::has_live_threads)
    }

    /// Start a thread on `target` in `module`, inside the main process. The
    /// thread runs its first slice on the next tick.
    pub fn start(&mut self, module: &str, target: &str) -> Result<ThreadId, VmError> {
        let entry = self.resolve_entry(module, target)?;
        Ok(self.spawn(target.to_string(), entry))
    }

    /// Start a thread on a dialogue block, addressed by its generated name.
    pub fn start_dialogue(&mut self, module: &str, block: &str) -> Result<ThreadId, VmError> {
        let loaded = self.modules.load(module)?;
        let (subroutine, record) = loaded
            .dialogue_block(block)
            .ok_or_else(|| VmError::DialogueBlockNotFound(block.to_string()))?;
        let entry = CallFrame {
            module: loaded.clone(),
            subroutine,
            pc: record.offset as usize,
        };
        let name = record.name.clone();
        Ok(self.spawn(name, entry))
    }

    fn resolve_entry(&mut self, module: &str, target: &str) -> Result<CallFrame, VmError> {
        let loaded = self.modules.load(module)?;
        let subroutine =
            loaded
                .subroutine_index(target)
                .ok_or_else(|| VmError::SubroutineNotFound {
                    module: loaded.name.clone(),
                    target: target.to_string(),
                })?;
        let pc = loaded.subroutines[subroutine as usize].offset as usize;
        Ok(CallFrame {
            module: loaded,
            subroutine,
            pc,
        })
    }

    fn spawn(&mut self, name: String, entry: CallFrame) -> ThreadId {
        let id = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;
        let mut thread = ScriptThread::new(id, name, entry);
        // Spawned between ticks, so it is eligible for the very next one.
        thread.yielded = false;
        self.main_process().threads.push(thread);
        id
    }

    fn main_process(&mut self) -> &mut Process {
        if self.processes.is_empty() {
            let id = ProcessId(self.next_process_id);
            self.next_process_id += 1;
            self.processes.push(Process::new(id, "main"));
        }
        &mut self.processes[0]
    }

    pub fn suspend_thread(&mut self, id: ThreadId, timeout: Option<Duration>) {
        for process in &mut self.processes {
            let since = process.clock.now();
            if let Some(thread) = process.thread_mut(id) {
                thread.suspension = Some(scheduler::Suspension { since, timeout });
                return;
            }
        }
    }

    pub fn resume_thread(&mut self, id: ThreadId) {
        for process in &mut self.processes {
            if let Some(thread) = process.thread_mut(id) {
                thread.suspension = None;
                return;
            }
        }
    }

    pub fn terminate_thread(&mut self, id: ThreadId) {
        let mut outcome = TickOutcome::default();
        for process in &mut self.processes {
            if process.thread(id).is_some() {
                process.terminate(id, &mut outcome);
                return;
            }
        }
    }

    pub fn thread_is_suspended(&self, id: ThreadId) -> bool {
        self.processes
            .iter()
            .find_map(|p| p.thread(id))
            .is_some_and(|t| t.suspension.is_some())
    }

    /// Advance every process by `dt` and run threads until the tick settles:
    /// wake elapsed suspensions, apply queued actions, run a slice for every
    /// runnable thread, and repeat while any of those made progress.
    pub fn run_tick(
        &mut self,
        dt: Duration,
        engine: &mut dyn EngineCallbacks,
    ) -> Result<TickReport, VmError> {
        let mut report = TickReport::default();
        let mut requests = Vec::new();

        let Vm {
            options,
            globals,
            modules,
            processes,
            next_thread_id,
            ..
        } = self;
        for process in processes.iter_mut() {
            process.clock.advance(dt);
            if process.clock.is_paused() {
                continue;
            }
            let mut outcome = TickOutcome::default();
            loop {
                let mut progress = process.resume_timed_out();
                progress |= process.drain_actions(&mut outcome);

                let peers: Vec<(ThreadId, String)> = process
                    .threads
                    .iter()
                    .map(|t| (t.id, t.name.clone()))
                    .collect();
                let Process {
                    threads, pending, ..
                } = process;
                for thread in threads.iter_mut() {
                    if !thread.is_runnable() {
                        continue;
                    }
                    let mut ctx = InterpContext {
                        globals: &mut *globals,
                        engine: &mut *engine,
                        modules: &mut *modules,
                        actions: pending,
                        peers: &peers,
                        process_requests: &mut requests,
                        next_thread_id: &mut *next_thread_id,
                        trace: options.trace,
                    };
                    interpreter::run_slice(thread, &mut ctx)?;
                    if thread.done {
                        pending.push_back(ThreadAction::Terminate(thread.id));
                    }
                    progress = true;
                }

                if !progress {
                    break;
                }
            }
            process.finish_tick();
            report.new.extend(outcome.new);
            report.terminated.extend(outcome.terminated);
        }

        self.apply_process_requests(requests, &mut report);
        Ok(report)
    }

    fn apply_process_requests(&mut self, requests: Vec<ProcessRequest>, report: &mut TickReport) {
        for request in requests {
            match request {
                ProcessRequest::Create { name, entry } => {
                    let pid = ProcessId(self.next_process_id);
                    self.next_process_id += 1;
                    let tid = ThreadId(self.next_thread_id);
                    self.next_thread_id += 1;
                    let mut process = Process::new(pid, name.clone());
                    process.threads.push(ScriptThread::new(tid, name, entry));
                    self.processes.push(process);
                    report.new.push(tid);
                }
                ProcessRequest::Pause(name) => {
                    if let Some(process) = self.process_by_name(&name) {
                        process.clock.pause();
                    }
                }
                ProcessRequest::Resume(name) => {
                    if let Some(process) = self.process_by_name(&name) {
                        process.clock.resume();
                    }
                }
                ProcessRequest::Terminate(name) => {
                    if let Some(index) = self.processes.iter().position(|p| p.name == name) {
                        let process = self.processes.remove(index);
                        for thread in &process.threads {
                            if !thread.done {
                                report.terminated.push(thread.id);
                            }
                        }
                    }
                }
            }
        }
    }

    fn process_by_name(&mut self, name: &str) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SubroutineKind;
    use crate::bytecode::module::SubroutineRecord;
    use crate::bytecode::{CodeWriter, Opcode, imm_tag};
    use builtins::BuiltinFunction;

    fn chapter(name: &str, offset: u32) -> SubroutineRecord {
        SubroutineRecord {
            kind: SubroutineKind::Chapter,
            name: name.to_string(),
            offset,
            dialogue_blocks: Vec::new(),
            parameters: Vec::new(),
        }
    }

    #[test]
    fn wait_suspends_until_virtual_time_elapses() {
        // main: Wait(250); $0 = 1;
        let mut w = CodeWriter::new();
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(250.0);
        w.write_op(Opcode::Dispatch);
        w.write_u16(BuiltinFunction::Wait as u16);
        w.write_u8(1);
        w.write_op(Opcode::Pop);
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(1.0);
        w.write_op(Opcode::StoreVar);
        w.write_u16(0);
        w.write_op(Opcode::Return);

        let mut vm = Vm::new(VmOptions::default());
        vm.add_module(NsxModule {
            name: "boot".into(),
            mtime: 0,
            subroutines: vec![chapter("main", 0)],
            imports: Vec::new(),
            strings: Vec::new(),
            code: w.into_bytes(),
        });
        let id = vm.start("boot", "main").expect("start");

        let mut engine = NullEngine;
        let dt = Duration::from_millis(200);
        vm.run_tick(dt, &mut engine).expect("tick 1");
        assert!(vm.thread_is_suspended(id));
        vm.run_tick(dt, &mut engine).expect("tick 2");
        assert_eq!(vm.globals().get(0).as_number(), Some(0.0));

        // 400ms of virtual time since the suspension: the wait is over.
        let report = vm.run_tick(dt, &mut engine).expect("tick 3");
        assert_eq!(vm.globals().get(0).as_number(), Some(1.0));
        assert_eq!(report.terminated, vec![id]);
        assert!(!vm.has_live_threads());
    }

    #[test]
    fn scene_call_spawns_a_joined_thread() {
        // main: call_scene sub; $0 = 1;    sub: $1 = 2;
        let mut w = CodeWriter::new();
        w.write_op(Opcode::CallScene);
        w.write_u16(u16::MAX);
        w.write_u16(0);
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(1.0);
        w.write_op(Opcode::StoreVar);
        w.write_u16(0);
        w.write_op(Opcode::Return);
        let scene_offset = w.position() as u32;
        w.write_op(Opcode::LoadImm);
        w.write_u8(imm_tag::NUMBER);
        w.write_f32(2.0);
        w.write_op(Opcode::StoreVar);
        w.write_u16(1);
        w.write_op(Opcode::Return);

        let mut vm = Vm::new(VmOptions::default());
        vm.add_module(NsxModule {
            name: "boot".into(),
            mtime: 0,
            subroutines: vec![
                chapter("main", 0),
                SubroutineRecord {
                    kind: SubroutineKind::Scene,
                    name: "sub".into(),
                    offset: scene_offset,
                    dialogue_blocks: Vec::new(),
                    parameters: Vec::new(),
                },
            ],
            imports: Vec::new(),
            strings: vec!["sub".into()],
            code: w.into_bytes(),
        });
        let main = vm.start("boot", "main").expect("start");

        let mut engine = NullEngine;
        let dt = Duration::from_millis(16);

        // The spawning tick reports the new thread but does not run it.
        let report = vm.run_tick(dt, &mut engine).expect("tick 1");
        assert_eq!(report.new.len(), 1);
        let scene = report.new[0];
        assert!(vm.thread_is_suspended(main));
        assert_eq!(vm.globals().get(1).as_number(), Some(0.0));

        // Next tick: the scene runs, terminates, and the join wakes main
        // within the same tick.
        let report = vm.run_tick(dt, &mut engine).expect("tick 2");
        assert_eq!(vm.globals().get(1).as_number(), Some(2.0));
        assert_eq!(vm.globals().get(0).as_number(), Some(1.0));
        assert_eq!(report.terminated, vec![scene, main]);
    }

    #[test]
    fn module_names_normalize_for_lookup() {
        assert_eq!(normalize_module_name("Boot.NSS"), "boot");
        assert_eq!(normalize_module_name("ch01.nsx"), "ch01");
        assert_eq!(normalize_module_name("CH01"), "ch01");
    }
}
