//! Command-line shell over the sedit core.
//!
//! # Responsibility
//! - Run and interactively debug `.sed` scripts from a terminal.
//! - Manage installed extensions without the desktop shell.
//! - Show, follow and clear the extension log.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sedit_core::config::DEFAULT_POLL_INTERVAL;
use sedit_core::extension::ModuleState;
use sedit_core::logging::{clear_log, read_log_tail};
use sedit_core::script::{compile, ExecError, Interpreter, Scope, StdoutBindings};
use sedit_core::{
    init_logging, DebugMessage, DebugSessionController, Directive, EditorHost, HeadlessHost,
    Sedit, SeditConfig,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;
    if let Err(err) = init_logging(&cli.log_level(&config), &config.log_dir.to_string_lossy()) {
        eprintln!("logging disabled: {err}");
    }
    match cli.command {
        Commands::Run(args) => execute_run(&args.file),
        Commands::Debug(args) => execute_debug(args),
        Commands::Extensions { command } => execute_extensions(config, command),
        Commands::LogTail(args) => execute_log_tail(&config.log_dir, args),
        Commands::LogClear => {
            if clear_log(&config.log_dir).map_err(anyhow::Error::msg)? {
                println!("cleared log in {}", config.log_dir.display());
            } else {
                println!("no log file in {}", config.log_dir.display());
            }
            Ok(())
        }
    }
}

const LOG_FOLLOW_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(author, version, about = "Script editor core: run, debug and extend")]
struct Cli {
    /// Keep extensions, settings and logs under this directory instead of
    /// the per-user config directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Log level (trace|debug|info|warn|error).
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn config(&self) -> Result<SeditConfig> {
        match &self.root {
            Some(root) => {
                let root = std::path::absolute(root)
                    .with_context(|| format!("invalid root {}", root.display()))?;
                Ok(SeditConfig::rooted_at(&root))
            }
            None => Ok(SeditConfig::default()),
        }
    }

    fn log_level(&self, config: &SeditConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.log_level.clone())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script to completion.
    Run(RunArgs),
    /// Step through a script interactively.
    Debug(DebugArgs),
    /// Inspect and manage extensions.
    Extensions {
        #[command(subcommand)]
        command: ExtensionCommand,
    },
    /// Print the last lines of the extension log.
    LogTail(LogTailArgs),
    /// Empty the active extension log file.
    LogClear,
}

#[derive(Args)]
struct RunArgs {
    file: PathBuf,
}

#[derive(Args)]
struct DebugArgs {
    file: PathBuf,
    /// Line to break on; repeatable.
    #[arg(long = "break", value_name = "LINE")]
    breakpoints: Vec<usize>,
}

#[derive(Args)]
struct LogTailArgs {
    #[arg(long, default_value_t = 50)]
    limit: usize,
    /// Keep printing new lines as they are written.
    #[arg(long)]
    follow: bool,
}

#[derive(Subcommand)]
enum ExtensionCommand {
    /// List discovered extensions and their state.
    List {
        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },
    Enable { name: String },
    Disable { name: String },
    /// Re-discover and reload every extension.
    Reload,
    /// Print the extensions menu with row indices.
    Menu,
    /// Activate a menu row and print the resulting buffer.
    Activate { index: usize },
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

fn execute_run(file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let program = compile(&source, &file.to_string_lossy())?;
    let mut globals = Scope::new();
    match Interpreter::new(&program, &mut globals, &StdoutBindings).run() {
        Ok(()) => Ok(()),
        Err(ExecError::Raised(err)) => bail!("{}", err.trace_text()),
        Err(ExecError::Halted) => bail!("execution halted"),
    }
}

fn execute_debug(args: DebugArgs) -> Result<()> {
    let source = read_source(&args.file)?;
    let lines: Vec<&str> = source.lines().collect();
    let controller = DebugSessionController::new();
    for line in args.breakpoints {
        controller.toggle_breakpoint(line);
    }
    controller.start(&source, &args.file.to_string_lossy())?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        let Some(message) = controller.wait_message(DEFAULT_POLL_INTERVAL) else {
            if controller.is_live() {
                continue;
            }
            bail!("debug session ended without a result");
        };
        println!("{}", message.render());
        match message {
            DebugMessage::Stopped { line, .. } => {
                if let Some(text) = line.checked_sub(1).and_then(|index| lines.get(index)) {
                    println!("{line:>4} | {text}");
                }
                let directive = prompt(&mut input)?;
                controller.set_action(directive);
            }
            DebugMessage::Error(_) => bail!("script raised an error"),
            DebugMessage::Finished | DebugMessage::Exited => return Ok(()),
            DebugMessage::Output(_) => {}
        }
    }
}

/// Reads directives until one parses; empty input steps, EOF quits.
fn prompt(input: &mut impl BufRead) -> Result<Directive> {
    loop {
        print!("(s)tep (n)ext (c)ontinue (q)uit> ");
        io::stdout().flush()?;
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(Directive::Quit);
        }
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(Directive::Step);
        }
        match Directive::parse(answer) {
            Some(directive) => return Ok(directive),
            None => println!("unknown directive `{answer}`"),
        }
    }
}

fn execute_log_tail(log_dir: &Path, args: LogTailArgs) -> Result<()> {
    if !args.follow {
        for line in read_log_tail(log_dir, args.limit) {
            println!("{line}");
        }
        return Ok(());
    }
    let mut seen = read_log_tail(log_dir, usize::MAX);
    for line in &seen[seen.len().saturating_sub(args.limit)..] {
        println!("{line}");
    }
    loop {
        std::thread::sleep(LOG_FOLLOW_INTERVAL);
        let current = read_log_tail(log_dir, usize::MAX);
        // Anything but an extension of what was seen means the file was
        // cleared or rotated; show it from the top.
        let fresh = if current.starts_with(&seen) {
            &current[seen.len()..]
        } else {
            &current[..]
        };
        for line in fresh {
            println!("{line}");
        }
        seen = current;
    }
}

fn execute_extensions(config: SeditConfig, command: ExtensionCommand) -> Result<()> {
    let host = Arc::new(HeadlessHost::new());
    let sedit = Sedit::start(config, host.clone());
    let registry = sedit.extensions();
    match command {
        ExtensionCommand::List { json: true } => {
            println!("{}", serde_json::to_string_pretty(&registry.extensions())?);
        }
        ExtensionCommand::List { json: false } => {
            println!("extensions dir: {}", registry.extensions_dir().display());
            for info in registry.extensions() {
                let state = match &info.state {
                    ModuleState::Loadable => "loadable".to_string(),
                    ModuleState::Loaded => "loaded".to_string(),
                    ModuleState::Failed(err) => format!("failed: {err}"),
                };
                let mark = if info.enabled { "x" } else { " " };
                println!("[{mark}] {} ({state})", info.descriptor.name);
            }
        }
        ExtensionCommand::Enable { name } => {
            registry.enable(&name)?;
            println!("enabled {name}");
        }
        ExtensionCommand::Disable { name } => {
            registry.disable(&name);
            println!("disabled {name}");
        }
        ExtensionCommand::Reload => {
            let summary = registry.load_all()?;
            println!(
                "loaded {} failed {} enabled {}",
                summary.loaded.len(),
                summary.failed.len(),
                summary.enabled.len()
            );
            for (name, err) in summary.failed.iter().chain(&summary.enable_failed) {
                println!("  {name}: {err}");
            }
        }
        ExtensionCommand::Menu => {
            for (index, entry) in registry.menu_snapshot().iter().enumerate() {
                println!("{index:>3}  {}", entry.display_label());
            }
        }
        ExtensionCommand::Activate { index } => {
            if !registry.activate(index) {
                bail!("no menu row at index {index}");
            }
            host.run_pending();
            println!("{}", host.buffer_text());
        }
    }
    sedit.shutdown();
    Ok(())
}
