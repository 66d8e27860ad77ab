use log::{debug, info};
use ovlasm::arm::ArmEncoder;
use ovlasm::config::Config;
use ovlasm::patch::PatchDocument;
use ovlasm::writer::write_document;
use ovlasm::{assemble_module, ModuleFailure};
use std::env;
use std::path::{Path, PathBuf};

fn usage(program: &str) {
    println!("ovlasm - assembles annotated overlay patch sources into a patch document");
    println!();
    println!(
        "Usage: {} -s <source-dir> -l <overlay-dir> -o <output.json> [-c <config.toml>]",
        program
    );
    println!();
    println!("  -s <dir>   directory of annotated .s modules");
    println!("  -l <dir>   directory of unpatched overlay binaries (<module>.bin,");
    println!("             read only for their byte length)");
    println!("  -o <file>  where to write the patch document");
    println!("  -c <file>  optional TOML config (base address, arch parameters)");
}

struct Args {
    source_dir: PathBuf,
    overlay_dir: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut source_dir = None;
    let mut overlay_dir = None;
    let mut output = None;
    let mut config = None;
    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("{} needs a value", flag))?;
        match flag {
            "-s" | "--source" => source_dir = Some(PathBuf::from(value)),
            "-l" | "--overlays" => overlay_dir = Some(PathBuf::from(value)),
            "-o" | "--output" => output = Some(PathBuf::from(value)),
            "-c" | "--config" => config = Some(PathBuf::from(value)),
            _ => return Err(format!("Unknown option: {}", flag)),
        }
        i += 2;
    }
    Ok(Args {
        source_dir: source_dir.ok_or("missing -s <source-dir>")?,
        overlay_dir: overlay_dir.ok_or("missing -l <overlay-dir>")?,
        output: output.ok_or("missing -o <output>")?,
        config,
    })
}

/// Every .s module under the source directory, sorted for deterministic
/// processing order.
fn find_modules(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut modules = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "s").unwrap_or(false) {
            modules.push(path);
        }
    }
    modules.sort();
    Ok(modules)
}

fn main() {
    env_logger::init();

    let argv: Vec<String> = env::args().collect();
    if argv.len() < 2 {
        usage(&argv[0]);
        return;
    }
    let args = match parse_args(&argv) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            usage(&argv[0]);
            std::process::exit(2);
        }
    };

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: cannot load config {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => Config::default(),
    };
    let target = config.target();
    debug!(
        "base address 0x{:08X}, pipeline offset {}",
        target.base_address, target.arch.pipeline_offset
    );

    let modules = match find_modules(&args.source_dir) {
        Ok(m) => m,
        Err(e) => {
            eprintln!(
                "Error: cannot read source directory {}: {}",
                args.source_dir.display(),
                e
            );
            std::process::exit(1);
        }
    };
    if modules.is_empty() {
        eprintln!(
            "Error: no .s modules found in {}",
            args.source_dir.display()
        );
        std::process::exit(1);
    }

    let encoder = ArmEncoder;
    let mut overlays = Vec::new();
    let mut failures: Vec<ModuleFailure> = Vec::new();

    for path in &modules {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let result = std::fs::read_to_string(path)
            .map_err(|e| e.into())
            .and_then(|source| {
                let overlay = args.overlay_dir.join(format!("{}.bin", name));
                let overlay_len = std::fs::metadata(&overlay)?.len() as usize;
                assemble_module(&name, &source, overlay_len, &target, &encoder)
            });

        match result {
            Ok(patch) => overlays.push(patch),
            Err(error) => {
                eprintln!("Error in module {}: {}", name, error);
                failures.push(ModuleFailure {
                    module: name,
                    error,
                });
            }
        }
    }

    // Failed modules abort only themselves; everything that assembled is
    // still written out.
    let document = PatchDocument { overlays };
    if let Err(e) = write_document(&document, &args.output) {
        eprintln!("Error: cannot write {}: {}", args.output.display(), e);
        std::process::exit(1);
    }
    info!(
        "Wrote {} overlay patch(es) to {}",
        document.overlays.len(),
        args.output.display()
    );

    if !failures.is_empty() {
        eprintln!();
        eprintln!("{} module(s) failed:", failures.len());
        for failure in &failures {
            eprintln!("  {}", failure);
        }
        std::process::exit(1);
    }
}
