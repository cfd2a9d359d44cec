//! lpcvm CLI: run scripts, evaluate code, disassemble, or start the REPL.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use colored::Colorize;
use tracing_subscriber::EnvFilter;

use lpcvm::config::VmConfig;
use lpcvm::error::LpcError;
use lpcvm::repl::Repl;
use lpcvm::vm::Vm;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_USAGE: i32 = 64;
const EXIT_COMPILE: i32 = 65;
const EXIT_RUNTIME: i32 = 70;
const EXIT_IO: i32 = 74;

/// CLI command to execute.
enum Command {
    /// Run a script file
    Run { file: String },
    /// Evaluate a string
    Eval { code: String },
    /// Print the bytecode of a file
    Disassemble { file: String, as_object: bool },
    /// Start the REPL
    Repl,
}

/// CLI options parsed from arguments.
struct Options {
    command: Command,
    object_root: Option<PathBuf>,
    trace: bool,
}

fn print_usage() {
    eprintln!("lpcvm {} - LPC-style object language", VERSION);
    eprintln!();
    eprintln!("Usage: lpcvm [options] [script.c]");
    eprintln!("       lpcvm [options] -e <code>");
    eprintln!("       lpcvm --disassemble <file> [--object]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -e <code>            Evaluate code");
    eprintln!("  --disassemble <file> Print the bytecode of a script");
    eprintln!("  --object             With --disassemble, compile the file as an object unit");
    eprintln!("  --object-root <dir>  Directory object paths are resolved against");
    eprintln!("  --trace              Log every executed instruction (LPCVM_LOG=trace)");
    eprintln!("  --help, -h           Show this help message");
    eprintln!("  --version, -v        Show version");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  lpcvm                         Start interactive REPL");
    eprintln!("  lpcvm game.c                  Run a script file");
    eprintln!("  lpcvm --object-root lib go.c  Run with objects loaded from lib/");
}

fn usage_error(message: &str) -> ! {
    eprintln!("{}", message);
    print_usage();
    process::exit(EXIT_USAGE);
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        command: Command::Repl,
        object_root: None,
        trace: false,
    };
    let mut as_object = false;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-e" => {
                i += 1;
                let Some(code) = args.get(i) else {
                    usage_error("-e requires code to evaluate");
                };
                options.command = Command::Eval { code: code.clone() };
            }
            "--disassemble" => {
                i += 1;
                let Some(file) = args.get(i) else {
                    usage_error("--disassemble requires a file");
                };
                options.command = Command::Disassemble {
                    file: file.clone(),
                    as_object: false,
                };
            }
            "--object" => as_object = true,
            "--object-root" => {
                i += 1;
                let Some(dir) = args.get(i) else {
                    usage_error("--object-root requires a directory");
                };
                options.object_root = Some(PathBuf::from(dir));
            }
            "--trace" => options.trace = true,
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            "--version" | "-v" => {
                println!("lpcvm {}", VERSION);
                process::exit(0);
            }
            arg if arg.starts_with('-') => usage_error(&format!("Unknown option: {}", arg)),
            _ => {
                if !matches!(options.command, Command::Repl) {
                    usage_error(&format!("Unexpected argument: {}", arg));
                }
                options.command = Command::Run { file: arg.clone() };
            }
        }
        i += 1;
    }

    if let Command::Disassemble { as_object: flag, .. } = &mut options.command {
        *flag = as_object;
    } else if as_object {
        usage_error("--object only applies to --disassemble");
    }
    options
}

fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("lpcvm=trace")
    } else {
        EnvFilter::try_from_env("LPCVM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(options: &Options) -> VmConfig {
    let mut config = match VmConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.to_string().red());
            process::exit(EXIT_USAGE);
        }
    };
    if let Some(root) = &options.object_root {
        config.object_root = root.clone();
    }
    if options.trace {
        config.trace_execution = true;
    }
    config
}

fn exit_code(err: &LpcError) -> i32 {
    match err {
        LpcError::Compile(_) | LpcError::Load(_) => EXIT_COMPILE,
        LpcError::Runtime { .. } => EXIT_RUNTIME,
        LpcError::Config(_) => EXIT_USAGE,
        LpcError::Io(_) => EXIT_IO,
    }
}

fn fail(err: LpcError) -> ! {
    eprintln!("{}", err.to_string().red());
    process::exit(exit_code(&err));
}

fn read_source(file: &str) -> String {
    fs::read_to_string(file).unwrap_or_else(|err| {
        eprintln!("{}", format!("Can't read {}: {}", file, err).red());
        process::exit(EXIT_IO);
    })
}

fn main() {
    let options = parse_args();
    init_logging(options.trace);
    let config = load_config(&options);

    match &options.command {
        Command::Repl => Repl::new(Vm::with_config(config)).run(),
        Command::Run { file } => {
            let mut vm = Vm::with_config(config);
            if let Err(err) = lpcvm::run_file(&mut vm, Path::new(file)) {
                fail(err);
            }
        }
        Command::Eval { code } => {
            let mut vm = Vm::with_config(config);
            if let Err(err) = lpcvm::run_in(&mut vm, "eval", code) {
                fail(err);
            }
        }
        Command::Disassemble { file, as_object } => {
            let source = read_source(file);
            match lpcvm::disassemble_source(file, &source, *as_object) {
                Ok(text) => print!("{}", text),
                Err(err) => fail(err),
            }
        }
    }
}
