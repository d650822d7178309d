//! CLI command implementations.

use std::fs;
use std::rc::Rc;

use scom_common::{BytecodeImage, ExportKind, RuntimeValue};
use scom_vm::{LinkPolicy, Runtime, VmConfig};
use tracing::debug;

/// Assemble a .sasm text file to a .scom module.
pub fn assemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: assemble requires an input file");
        eprintln!("Usage: scom assemble <input.sasm> [-o output.scom]");
        return Err(1);
    }

    let input = &args[0];

    let output = if args.len() >= 3 && args[1] == "-o" {
        args[2].clone()
    } else if let Some(stem) = input.strip_suffix(".sasm") {
        format!("{stem}.scom")
    } else {
        format!("{input}.scom")
    };

    let text = fs::read_to_string(input).map_err(|e| {
        eprintln!("error: cannot read '{input}': {e}");
        1
    })?;

    let image = scom_assembler::assemble(&text).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    let bytes = image.encode();

    fs::write(&output, &bytes).map_err(|e| {
        eprintln!("error: cannot write '{output}': {e}");
        1
    })?;

    eprintln!(
        "assembled {} code words, {} exports ({} bytes) -> {output}",
        image.code().len(),
        image.exports().len(),
        bytes.len()
    );
    Ok(())
}

/// Disassemble a .scom module to canonical text.
pub fn disassemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: disassemble requires an input file");
        eprintln!("Usage: scom disassemble <input.scom>");
        return Err(1);
    }

    let image = read_image(&args[0])?;
    print!("{}", scom_assembler::disassemble(&image));
    Ok(())
}

/// Run the static checks on a .scom module.
pub fn verify(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: verify requires an input file");
        eprintln!("Usage: scom verify <input.scom>");
        return Err(1);
    }

    let input = &args[0];
    let image = read_image(input)?;

    match scom_verifier::verify(&image) {
        Ok(()) => {
            println!("OK: {input} ({} code words)", image.code().len());
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                eprintln!("error: {e}");
            }
            Err(2)
        }
    }
}

/// List the export table of a .scom module.
pub fn exports(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: exports requires an input file");
        eprintln!("Usage: scom exports <input.scom>");
        return Err(1);
    }

    let image = read_image(&args[0])?;
    for export in image.exports() {
        println!("{} {} {}", export.kind.name(), export.name, export.address);
    }
    Ok(())
}

/// Verify, link, and call one export of a .scom module.
///
/// The export defaults to the first function export. Remaining arguments
/// are passed as integers.
pub fn run(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: run requires an input file");
        eprintln!("Usage: scom run <input.scom> [export] [int args...]");
        return Err(1);
    }

    let input = &args[0];
    let image = read_image(input)?;

    if let Err(errors) = scom_verifier::verify(&image) {
        for e in &errors {
            eprintln!("error: {e}");
        }
        return Err(2);
    }

    let (export, rest) = match args.get(1) {
        Some(name) if name.parse::<i32>().is_err() => (name.clone(), &args[2..]),
        _ => {
            let first = image
                .exports()
                .iter()
                .find(|e| e.kind == ExportKind::Function)
                .ok_or_else(|| {
                    eprintln!("error: {input} exports no functions");
                    1
                })?;
            (first.name.clone(), &args[1..])
        }
    };
    let call_args = parse_int_args(rest)?;

    let mut runtime = Runtime::new(vm_config()?);
    crate::host::install(&mut runtime).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;
    let id = runtime.instantiate(Rc::new(image)).map_err(|e| {
        eprintln!("link error: {e}");
        1
    })?;
    debug!(%export, args = call_args.len(), "calling");

    match runtime.call(id, &export, &call_args) {
        Ok(value) => {
            println!("{value}");
            Ok(())
        }
        Err(e) => {
            eprintln!("runtime error: {e}");
            Err(3)
        }
    }
}

// ---- Helpers ----

fn read_image(path: &str) -> Result<BytecodeImage, i32> {
    let bytes = fs::read(path).map_err(|e| {
        eprintln!("error: cannot read '{path}': {e}");
        1
    })?;

    let image = BytecodeImage::decode(&bytes).map_err(|e| {
        eprintln!("error: invalid module: {e}");
        1
    })?;
    debug!(path, words = image.code().len(), version = image.version(), "loaded module");
    Ok(image)
}

fn parse_int_args(args: &[String]) -> Result<Vec<RuntimeValue>, i32> {
    args.iter()
        .map(|arg| {
            arg.parse::<i32>().map(RuntimeValue::Int).map_err(|_| {
                eprintln!("error: argument '{arg}' is not an integer");
                1
            })
        })
        .collect()
}

/// Limits and link policy, with overrides from the environment.
fn vm_config() -> Result<VmConfig, i32> {
    let mut config = VmConfig::default();

    if let Ok(value) = std::env::var("SCOM_LINK_POLICY") {
        let policy: LinkPolicy = value.parse().map_err(|e| {
            eprintln!("error: SCOM_LINK_POLICY: {e}");
            1
        })?;
        config = config.with_link_policy(policy);
    }

    if let Ok(value) = std::env::var("SCOM_MAX_LOOP_ITERATIONS") {
        let limit: u32 = value.parse().map_err(|_| {
            eprintln!("error: SCOM_MAX_LOOP_ITERATIONS must be a non-negative integer, got '{value}'");
            1
        })?;
        config = config.with_max_loop_iterations(limit);
    }

    Ok(config)
}
