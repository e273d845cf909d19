use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use nsscript::bytecode::NsxModule;
use nsscript::bytecode::disasm::disassemble_subroutine;

#[derive(Parser)]
#[command(author, version, about = "Disassemble compiled .nsx modules", long_about = None)]
struct Cli {
    /// Compiled module file
    input: PathBuf,
    /// Disassemble only the named subroutine
    #[arg(short, long)]
    subroutine: Option<String>,
    /// Print instructions as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;
    let name = cli
        .input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("module");
    let module = NsxModule::decode(&bytes, name)?;

    let indices: Vec<usize> = match &cli.subroutine {
        Some(target) => {
            let index = module
                .subroutine_index(target)
                .ok_or_else(|| anyhow!("no subroutine `{target}` in `{name}`"))?;
            vec![index as usize]
        }
        None => (0..module.subroutines.len()).collect(),
    };

    if cli.json {
        let mut listing = serde_json::Map::new();
        for index in indices {
            let lines = disassemble_subroutine(&module, index)?;
            listing.insert(
                module.subroutines[index].name.clone(),
                serde_json::to_value(lines)?,
            );
        }
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("module {} (mtime {})", module.name, module.mtime);
    for index in indices {
        let sub = &module.subroutines[index];
        println!("\n{:?} {} @ {:06}", sub.kind, sub.name, sub.offset);
        for parameter in &sub.parameters {
            println!("  param {parameter}");
        }
        for block in &sub.dialogue_blocks {
            println!("  block {} ({}) @ {:06}", block.name, block.box_name, block.offset);
        }
        for line in disassemble_subroutine(&module, index)? {
            println!("  {line}");
        }
    }
    Ok(())
}
