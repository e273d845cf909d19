//! Source-to-module compilation: file lookup, include resolution, and the
//! checker/emitter pass. One `Compilation` owns the global variable table
//! shared by every module it compiles.

mod emitter;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::bytecode::NsxModule;
use crate::bytecode::globals::GlobalsTable;
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::parser::{self, ParseError};
use crate::tokenizer::{self, LexContext};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("source file `{0}` not found")]
    SourceNotFound(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An included source file, reduced to what resolution needs: its module
/// name and the subroutines it exports.
#[derive(Debug, Clone)]
pub struct IncludedModule {
    pub name: String,
    pub subroutines: Vec<String>,
}

pub struct Compilation {
    source_root: PathBuf,
    globals: GlobalsTable,
    diagnostics: DiagnosticBag,
    exports: HashMap<String, Vec<String>>,
}

impl Compilation {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            globals: GlobalsTable::new(),
            diagnostics: DiagnosticBag::new(),
            exports: HashMap::new(),
        }
    }

    pub fn globals(&self) -> &GlobalsTable {
        &self.globals
    }

    pub fn diagnostics(&self) -> &DiagnosticBag {
        &self.diagnostics
    }

    /// Compile the named module from the source root. Semantic problems land
    /// in the diagnostic bag; only unreadable or unparseable input is fatal.
    pub fn compile_module(&mut self, name: &str) -> Result<NsxModule, CompileError> {
        let path = self.find_source(name)?;
        let source = fs::read_to_string(&path)?;
        let mtime = source_mtime(&path);
        self.compile_source(&module_stem(name), &source, mtime)
    }

    /// Compile from an in-memory source string.
    pub fn compile_source(
        &mut self,
        name: &str,
        source: &str,
        mtime: i64,
    ) -> Result<NsxModule, CompileError> {
        let file_name = format!("{name}.nss");
        let (tokens, lex_diagnostics) = tokenizer::tokenize(source, LexContext::Code);
        self.diagnostics.extend(lex_diagnostics);
        let (parsed, parse_diagnostics) = parser::parse_source_file(&file_name, tokens);
        self.diagnostics.extend(parse_diagnostics);
        let file = parsed?;

        let mut includes = Vec::with_capacity(file.includes.len());
        for include in &file.includes {
            includes.push(IncludedModule {
                name: module_stem(include),
                subroutines: self.include_exports(include),
            });
        }

        Ok(emitter::emit_module(
            &file,
            name,
            mtime,
            &includes,
            &mut self.globals,
            &mut self.diagnostics,
        ))
    }

    /// Subroutine names exported by an included file. Parsed once and
    /// cached; a broken include degrades to an empty export list with an
    /// error diagnostic.
    fn include_exports(&mut self, include: &str) -> Vec<String> {
        let key = module_stem(include);
        if let Some(cached) = self.exports.get(&key) {
            return cached.clone();
        }
        let exports = self.parse_exports(include).unwrap_or_else(|err| {
            self.diagnostics.report(
                Diagnostic::error(format!("cannot resolve `#include \"{include}\"`: {err}"))
                    .in_file(include.to_string()),
            );
            Vec::new()
        });
        self.exports.insert(key, exports.clone());
        exports
    }

    fn parse_exports(&mut self, include: &str) -> Result<Vec<String>, CompileError> {
        let path = self.find_source(include)?;
        let source = fs::read_to_string(&path)?;
        let (tokens, _) = tokenizer::tokenize(&source, LexContext::Code);
        let (parsed, _) = parser::parse_source_file(include, tokens);
        let file = parsed?;
        Ok(file.subroutines.into_iter().map(|s| s.name).collect())
    }

    /// Case-insensitive `.nss` lookup under the source root. Script sources
    /// reference each other with inconsistent casing.
    fn find_source(&self, name: &str) -> Result<PathBuf, CompileError> {
        let stem = module_stem(name);
        let entries =
            fs::read_dir(&self.source_root).map_err(|_| CompileError::SourceNotFound(name.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_nss = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("nss"));
            let matches = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.eq_ignore_ascii_case(&stem));
            if is_nss && matches {
                return Ok(path);
            }
        }
        Err(CompileError::SourceNotFound(name.to_string()))
    }
}

/// Module name without case or a `.nss`/`.nsx` extension.
fn module_stem(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    lower
        .strip_suffix(".nss")
        .or_else(|| lower.strip_suffix(".nsx"))
        .unwrap_or(&lower)
        .to_string()
}

fn source_mtime(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|time| DateTime::<Utc>::from(time).timestamp())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disasm::disassemble_subroutine;

    fn compile(source: &str) -> (NsxModule, Compilation) {
        let mut compilation = Compilation::new(".");
        let module = compilation
            .compile_source("test", source, 0)
            .expect("compile");
        (module, compilation)
    }

    fn mnemonics(module: &NsxModule, index: usize) -> Vec<&'static str> {
        disassemble_subroutine(module, index)
            .expect("disassemble")
            .iter()
            .map(|line| line.mnemonic)
            .collect()
    }

    #[test]
    fn assignment_compiles_to_store() {
        let (module, compilation) = compile("chapter main { $x = 3; }");
        assert_eq!(
            mnemonics(&module, 0),
            vec!["LOAD_IMM", "STORE_VAR", "RETURN"]
        );
        assert_eq!(compilation.globals().slot("$x"), Some(0));
        assert!(!compilation.diagnostics().has_errors());
    }

    #[test]
    fn if_else_branches_over_both_arms() {
        let (module, _) = compile("chapter main { if ($a > 1) { $b = 1; } else { $b = 2; } }");
        let lines = disassemble_subroutine(&module, 0).expect("disassemble");
        let cond_jump = lines
            .iter()
            .find(|l| l.mnemonic == "JUMP_IF_FALSE")
            .expect("conditional jump");
        let end_jump = lines.iter().find(|l| l.mnemonic == "JUMP").expect("jump");
        // The false edge lands after the unconditional jump that skips the
        // else arm, and that jump lands at the end of the subroutine.
        assert!(cond_jump.target.unwrap() > end_jump.offset);
        let last = lines.last().unwrap();
        assert_eq!(last.mnemonic, "RETURN");
        assert_eq!(end_jump.target.unwrap(), last.offset);
    }

    #[test]
    fn every_break_jumps_to_loop_end() {
        let (module, _) = compile(
            "chapter main { while (true) { if ($a) { break; } if ($b) { break; } $c = 1; } }",
        );
        let lines = disassemble_subroutine(&module, 0).expect("disassemble");
        let exit = lines
            .iter()
            .find(|l| l.mnemonic == "JUMP_IF_FALSE")
            .and_then(|l| l.target)
            .expect("loop exit");
        let breaks: Vec<_> = lines
            .iter()
            .filter(|l| l.mnemonic == "JUMP" && l.target == Some(exit))
            .collect();
        // The two breaks target the same instruction as the loop's exit edge.
        assert_eq!(breaks.len(), 2);
    }

    #[test]
    fn while_loops_back_to_condition() {
        let (module, _) = compile("chapter main { while ($a < 3) { $a++; } }");
        let lines = disassemble_subroutine(&module, 0).expect("disassemble");
        let back_edge = lines
            .iter()
            .filter(|l| l.mnemonic == "JUMP")
            .last()
            .expect("back edge");
        assert_eq!(back_edge.target, Some(0));
    }

    #[test]
    fn function_arguments_travel_through_parameter_slots() {
        let (module, compilation) = compile(
            "function greet($who) { Log($who); } chapter main { greet(\"rin\"); }",
        );
        // Chapters order before functions, so `main` is subroutine 0.
        assert_eq!(module.subroutines[0].name, "main");
        assert_eq!(
            mnemonics(&module, 0),
            vec!["LOAD_IMM", "STORE_VAR", "CALL", "RETURN"]
        );
        assert!(compilation.globals().slot("$who").is_some());
        // `Log` is not a built-in; its unresolved use inside `greet` is the
        // only expected error.
        assert!(compilation.diagnostics().has_errors());
    }

    #[test]
    fn select_polls_in_a_loop() {
        let (module, _) = compile(
            r#"scene s {
                select {
                    case yes: { $a = 1; }
                    case no: { $a = 2; }
                }
            }"#,
        );
        let lines = disassemble_subroutine(&module, 0).expect("disassemble");
        assert_eq!(lines[0].mnemonic, "SELECT_START");
        let select_end = lines
            .iter()
            .position(|l| l.mnemonic == "SELECT_END")
            .expect("select end");
        // The instruction after SELECT_END re-enters the poll loop when no
        // choice was picked.
        let retry = &lines[select_end + 1];
        assert_eq!(retry.mnemonic, "JUMP_IF_FALSE");
        assert_eq!(retry.target, Some(0));
        assert_eq!(
            lines.iter().filter(|l| l.mnemonic == "GET_SEL_CHOICE").count(),
            2
        );
    }

    #[test]
    fn dialogue_block_records_offset_and_lines() {
        let (module, _) = compile("scene s {\n<pre box01>\nHello.\nWorld.\n</pre>\n}");
        let sub = &module.subroutines[0];
        assert_eq!(sub.dialogue_blocks.len(), 1);
        let block = &sub.dialogue_blocks[0];
        assert_eq!(block.box_name, "box01");
        assert_eq!(block.name, "text001");
        assert_eq!(block.offset, 0);
        assert_eq!(
            mnemonics(&module, 0),
            vec![
                "ACTIVATE_BLOCK",
                "APPEND_DIALOGUE",
                "LINE_END",
                "APPEND_DIALOGUE",
                "LINE_END",
                "RETURN"
            ]
        );
    }

    #[test]
    fn first_builtin_argument_is_an_entity_name_not_a_constant() {
        let (module, _) = compile("chapter main { Fade(White, 300, 1000, Axl1, true); }");
        let lines = disassemble_subroutine(&module, 0).expect("disassemble");
        // Arg 0 `White` is the target entity's name; arg 3 `Axl1` stays a
        // constant.
        assert!(lines[0].operands.contains("\"White\""));
        assert!(lines[3].operands.starts_with("const"));
    }

    #[test]
    fn far_calls_record_imports() {
        let (module, _) = compile("chapter main { call_scene boot->title; }");
        assert_eq!(module.imports, vec!["boot".to_string()]);
        let lines = disassemble_subroutine(&module, 0).expect("disassemble");
        assert_eq!(lines[0].mnemonic, "CALL_SCENE");
        assert_eq!(lines[0].operands, "boot->title");
    }

    #[test]
    fn unresolved_name_reports_error_but_still_emits() {
        let (module, compilation) = compile("chapter main { $x = nonsense; }");
        assert!(compilation.diagnostics().has_errors());
        assert_eq!(
            mnemonics(&module, 0),
            vec!["LOAD_IMM", "STORE_VAR", "RETURN"]
        );
    }

    #[test]
    fn oversized_subroutine_reports_branch_out_of_range() {
        // A loop body past the i16 branch reach must fail the compile
        // instead of emitting wrapped jump operands.
        let body = "$a = 1;\n".repeat(4000);
        let source = format!("chapter main {{ while ($go) {{ {body} }} }}");
        let mut compilation = Compilation::new(".");
        compilation
            .compile_source("test", &source, 0)
            .expect("compile");
        assert!(
            compilation
                .diagnostics()
                .errors()
                .any(|d| d.message.contains("branch target out of range")),
            "expected a branch range error"
        );
    }

    #[test]
    fn subroutines_order_chapters_scenes_functions() {
        let (module, _) = compile(
            "function f() { } scene s { } chapter c { } scene s2 { }",
        );
        let names: Vec<_> = module.subroutines.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "s", "s2", "f"]);
    }
}
