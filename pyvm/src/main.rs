use clap::Parser as ClapParser;
use std::{fs, path::PathBuf, process, thread};

use log::LevelFilter;

use pyvm::{Interpreter, InterpreterCreateInfo, StdoutSink, VmError, VmSettings, read_module};

/// Interpreted frames recurse on the native stack.
const MAIN_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Compiled modules to execute in order
    #[arg(required = true, help = "The .pyc files to execute")]
    files: Vec<PathBuf>,

    /// Print the disassembly of every code object instead of executing
    #[arg(long, help = "Dump disassembly for inputs")]
    dis: bool,

    /// Maximum depth of nested interpreted calls
    #[arg(long, help = "Call depth at which execution aborts")]
    max_depth: Option<usize>,

    /// Extra directories searched by `import`
    #[arg(long = "path", help = "Add a module search directory")]
    paths: Vec<PathBuf>,

    /// Log every executed instruction
    #[arg(long, help = "Trace instructions (implies RUST_LOG=trace)")]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.trace {
        logger.filter_level(LevelFilter::Trace);
    }
    logger.init();

    let runner = thread::Builder::new()
        .name("pyvm-main".into())
        .stack_size(MAIN_STACK_SIZE)
        .spawn(move || run(cli));
    let code = match runner.map(|handle| handle.join()) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("interpreter thread panicked");
            1
        }
        Err(err) => {
            eprintln!("Error spawning interpreter thread: {}", err);
            1
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> i32 {
    let mut settings = VmSettings {
        trace: cli.trace,
        native_stack_budget: MAIN_STACK_SIZE / 2,
        ..Default::default()
    };
    if let Some(depth) = cli.max_depth {
        settings.max_call_depth = depth;
    }
    settings.search_paths.splice(0..0, cli.paths.iter().cloned());

    for filename in &cli.files {
        let bytes = match fs::read(filename) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("Error reading file '{}': {}", filename.display(), err);
                return 1;
            }
        };

        if cli.dis {
            match read_module(&bytes) {
                Ok(module) => {
                    println!("== {} ==", filename.display());
                    print!("{}", module.code.disassemble());
                }
                Err(err) => {
                    eprintln!("Error loading {}: {}", filename.display(), err);
                    return 1;
                }
            }
            continue;
        }

        let mut settings = settings.clone();
        if let Some(dir) = filename.parent().filter(|d| !d.as_os_str().is_empty()) {
            settings.search_paths.insert(0, dir.to_path_buf());
        }
        let mut interpreter = Interpreter::new(InterpreterCreateInfo {
            settings,
            output: Box::new(StdoutSink),
            source: None,
        });
        match interpreter.run_module(&bytes) {
            Ok(_) => {}
            Err(VmError::Uncaught(exc)) => {
                eprintln!("{exc}");
                return 1;
            }
            Err(err) => {
                eprintln!("Error executing {}: {}", filename.display(), err);
                return 1;
            }
        }
    }
    0
}
