//! mmixlet - CLI Entry Point
//!
//! Commands:
//! - `mmixlet-emu run <program> [ARGS]...` - Run an image or ASM file
//! - `mmixlet-emu debug <program>` - Interactive debugger
//! - `mmixlet-emu asm <source>` - Assemble to an image
//! - `mmixlet-emu disasm <image>` - Disassemble an image

use clap::{Parser, Subcommand};
use mmixlet::{Machine, MachineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mmixlet-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "A minimal MMIX-flavoured register machine emulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts or the step budget runs out
    Run {
        /// Path to the image or ASM file to execute
        program: String,
        /// Arguments for the program (only their count is visible, in $0)
        args: Vec<String>,
        /// Maximum number of instructions to run (default: 10000)
        #[arg(short, long)]
        max_steps: Option<u64>,
        /// Memory size in bytes (default: 65536)
        #[arg(long)]
        memory_size: Option<usize>,
        /// JSON machine config file
        #[arg(short, long)]
        config: Option<String>,
        /// Log every executed instruction to stderr
        #[arg(short, long)]
        trace: bool,
        /// Print the final report to stderr as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive debugger
    #[cfg(feature = "tui")]
    Debug {
        /// Path to the image or ASM file to debug
        program: String,
        /// Memory size in bytes (default: 65536)
        #[arg(long)]
        memory_size: Option<usize>,
    },
    /// Assemble source to an image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { program, args, max_steps, memory_size, config, trace, json } => {
            init_logging(trace);
            let mut config = load_config(config.as_deref());
            if let Some(steps) = max_steps {
                config.max_steps = steps;
            }
            if let Some(size) = memory_size {
                config.memory_size = size;
            }
            config.arg_count = 1 + args.len() as u64;
            run_program(&program, &config, json);
        }
        #[cfg(feature = "tui")]
        Commands::Debug { program, memory_size } => {
            let mut config = MachineConfig::default();
            if let Some(size) = memory_size {
                config.memory_size = size;
            }
            debug_program(&program, &config);
        }
        Commands::Asm { source, output } => {
            init_logging(false);
            assemble_file(&source, output);
        }
        Commands::Disasm { image } => {
            init_logging(false);
            disassemble_file(&image);
        }
    }
}

/// Diagnostics go to stderr so they never mix with program output.
fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&str>) -> MachineConfig {
    match path {
        Some(path) => match MachineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => MachineConfig::default(),
    }
}

/// Build a machine from an image file, or assemble an `.asm` file first.
fn load_program(path: &str, config: &MachineConfig) -> Machine {
    use mmixlet::asm::assemble_image;

    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: failed to read {}: {}", path, e);
                std::process::exit(1);
            }
        };

        let image = match assemble_image(&source) {
            Ok(image) => image,
            Err(e) => {
                eprintln!("error: assembly failed: {}", e);
                std::process::exit(1);
            }
        };

        match Machine::from_image(&image, config.memory_size, config.arg_count) {
            Ok(machine) => machine,
            Err(e) => {
                eprintln!("error: problem loading {}: {}", path, e);
                std::process::exit(1);
            }
        }
    } else {
        match mmixlet::load_machine(path, config.memory_size, config.arg_count) {
            Ok(machine) => machine,
            Err(e) => {
                eprintln!("error: problem loading {}: {}", path, e);
                std::process::exit(1);
            }
        }
    }
}

fn run_program(path: &str, config: &MachineConfig, json: bool) {
    use mmixlet::RunReport;

    let mut machine = load_program(path, config);
    let start = machine.steps;

    let result = machine.run_stdout(config.max_steps);
    let report = match &result {
        Ok(outcome) => RunReport::capture(&machine, outcome.steps, Some(outcome.stop), None),
        Err(e) => RunReport::capture(&machine, machine.steps - start, None, Some(e.to_string())),
    };

    // stdout belongs to the program; the report goes to stderr
    if let Err(e) = report.write_to(&mut std::io::stderr(), json) {
        eprintln!("error: failed to write report: {}", e);
    }

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, config: &MachineConfig) {
    use mmixlet::tui::run_debugger;

    let machine = load_program(path, config);

    if let Err(e) = run_debugger(machine) {
        eprintln!("error: debugger failed: {}", e);
        std::process::exit(1);
    }
}

fn assemble_file(source_path: &str, output: Option<String>) {
    use mmixlet::asm::{assemble_image, save_image};

    let out_path = output.unwrap_or_else(|| {
        match source_path.strip_suffix(".asm") {
            Some(stem) => format!("{}.bin", stem),
            None => format!("{}.bin", source_path),
        }
    });

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to read {}: {}", source_path, e);
            std::process::exit(1);
        }
    };

    let image = match assemble_image(&source) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("error: assembly failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = save_image(&out_path, &image) {
        eprintln!("error: failed to save {}: {}", out_path, e);
        std::process::exit(1);
    }

    println!("assembled {} words: {} -> {}", image.len(), source_path, out_path);
}

fn disassemble_file(image_path: &str) {
    use mmixlet::asm::disasm::disassemble;
    use mmixlet::load_image;

    let image = match load_image(image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("error: failed to load {}: {}", image_path, e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(&image.words));
}
