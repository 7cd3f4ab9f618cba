mod completer;
mod report;
mod state;

use std::fs::{self, File};
use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser as ClapParser;
use ember::{Ember, EmberError};
use env_logger::Builder;
use log::{LevelFilter, debug, info};
use rustyline::Editor;
use rustyline::error::ReadlineError;

use completer::EmberHelper;
use report::report_error;
use state::ReplState;

/// Any scan, parse or resolution error; nothing was executed.
const EXIT_STATIC_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
/// The script or log file could not be opened.
const EXIT_IO_ERROR: u8 = 74;

#[derive(ClapParser, Debug)]
#[command(version, about = "Ember language interpreter", long_about = None)]
struct Cli {
    /// Script to run. Without one, piped stdin is run as a script and a
    /// terminal gets the REPL.
    script: Option<PathBuf>,

    /// Write debug logs to FILE
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Print the parsed program instead of running it
    #[arg(long)]
    ast: bool,
}

fn init_logger(log: Option<&Path>) -> Result<(), EmberError> {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Off).parse_default_env();

    if let Some(path) = log {
        let log_file = File::create(path)?;
        builder
            .format(|buf, record| {
                let module = record.module_path().unwrap_or("<unnamed>");
                writeln!(buf, "[{} {}] {}", record.level(), module, record.args())
            })
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .filter_level(LevelFilter::Debug);
    }

    builder.init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.log.as_deref()) {
        eprintln!("{e}");
        return ExitCode::from(EXIT_IO_ERROR);
    }
    info!("CLI arguments: {:?}", cli);

    let mut ember = Ember::new();
    match &cli.script {
        Some(path) => run_file(&mut ember, path, cli.ast),
        None if !std::io::stdin().is_terminal() => run_stdin(&mut ember, cli.ast),
        None => run_repl(&mut ember),
    }
}

fn run_file(ember: &mut Ember, path: &Path, print_ast: bool) -> ExitCode {
    match fs::read_to_string(path) {
        Ok(source) => run_source(ember, &source, &path.to_string_lossy(), print_ast),
        Err(e) => {
            report_error(&EmberError::from(e), "", None, std::io::stderr());
            ExitCode::from(EXIT_IO_ERROR)
        }
    }
}

fn run_stdin(ember: &mut Ember, print_ast: bool) -> ExitCode {
    let mut source = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut source) {
        report_error(&EmberError::from(e), "", None, std::io::stderr());
        return ExitCode::from(EXIT_IO_ERROR);
    }
    run_source(ember, &source, "<stdin>", print_ast)
}

fn run_source(ember: &mut Ember, source: &str, filename: &str, print_ast: bool) -> ExitCode {
    debug!("running {} ({} bytes)", filename, source.len());
    let errors = if print_ast {
        match ember.parse(source) {
            Ok(statements) => {
                for stmt in &statements {
                    println!("{stmt}");
                }
                Vec::new()
            }
            Err(errors) => errors,
        }
    } else {
        ember.run(source, std::io::stdout())
    };

    for error in &errors {
        report_error(error, source, Some(filename), std::io::stderr());
    }

    exit_code(&errors)
}

fn exit_code(errors: &[EmberError]) -> ExitCode {
    if errors.is_empty() {
        ExitCode::SUCCESS
    } else if errors.iter().any(EmberError::is_static) {
        ExitCode::from(EXIT_STATIC_ERROR)
    } else {
        debug!("exiting after runtime error");
        ExitCode::from(EXIT_RUNTIME_ERROR)
    }
}

fn run_repl(ember: &mut Ember) -> ExitCode {
    let mut rl: Editor<EmberHelper, _> = match Editor::with_config(rustyline::Config::default())
    {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not start the REPL: {e}");
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };
    let helper = EmberHelper::new();
    helper.set_variables(ember.variable_names());
    rl.set_helper(Some(helper));
    let mut state = ReplState::new();

    loop {
        match rl.readline(&state.prompt()) {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);

                if state.process_line(&line) {
                    let buffer = state.take_buffer();
                    let source = if ReplState::should_auto_print(&buffer) {
                        ReplState::wrap_for_print(&buffer)
                    } else {
                        buffer
                    };
                    let errors = ember.run(&source, std::io::stdout());
                    for error in &errors {
                        report_error(error, &source, None, std::io::stderr());
                    }

                    if let Some(helper) = rl.helper() {
                        helper.set_variables(ember.variable_names());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                if state.is_empty() {
                    break;
                }
                state.cancel();
                println!();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("REPL error: {err}");
                return ExitCode::from(EXIT_IO_ERROR);
            }
        }
    }

    ExitCode::SUCCESS
}
