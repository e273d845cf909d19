use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use nsscript::Compilation;

#[derive(Parser)]
#[command(author, version, about = "Compile .nss scripts into .nsx modules", long_about = None)]
struct Cli {
    /// Modules to compile, by name or source file
    inputs: Vec<String>,
    /// Directory holding the .nss sources
    #[arg(short, long, default_value = ".")]
    source_root: PathBuf,
    /// Output directory for compiled modules (defaults to the source root)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Path for the shared global variable table
    #[arg(long)]
    globals: Option<PathBuf>,
    /// Print diagnostics as JSON instead of plain text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.inputs.is_empty() {
        bail!("no input modules given");
    }
    let output_dir = cli.output.unwrap_or_else(|| cli.source_root.clone());
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut compilation = Compilation::new(&cli.source_root);
    for input in &cli.inputs {
        let module = compilation
            .compile_module(input)
            .with_context(|| format!("failed to compile `{input}`"))?;
        let out_path = output_dir.join(format!("{}.nsx", module.name));
        let bytes = module.to_bytes()?;
        fs::write(&out_path, &bytes)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        println!(
            "Compiled {} -> {} ({} subroutines, {} bytes)",
            input,
            out_path.display(),
            module.subroutines.len(),
            bytes.len()
        );
    }

    let globals_path = cli
        .globals
        .unwrap_or_else(|| output_dir.join("globals.nsb"));
    fs::write(&globals_path, compilation.globals().to_bytes()?)
        .with_context(|| format!("failed to write {}", globals_path.display()))?;
    println!(
        "Globals table -> {} ({} variables)",
        globals_path.display(),
        compilation.globals().len()
    );

    // Diagnostics go to stderr in both forms; stdout stays machine-clean.
    let diagnostics = compilation.diagnostics();
    if cli.json {
        eprintln!("{}", serde_json::to_string_pretty(diagnostics.all())?);
    } else {
        for diagnostic in diagnostics.all() {
            eprintln!("{diagnostic}");
        }
    }
    if diagnostics.has_errors() {
        bail!(
            "compilation finished with {} error(s)",
            diagnostics.error_count()
        );
    }
    Ok(())
}
