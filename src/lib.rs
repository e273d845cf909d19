pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod diagnostics;
pub mod parser;
pub mod tokenizer;
pub mod vm;

pub use compiler::{Compilation, CompileError};
pub use diagnostics::{Diagnostic, DiagnosticBag, Severity};
pub use vm::{EngineCallbacks, ThreadId, TickReport, Vm, VmError, VmOptions};
