//! mi-debugger - Interactive debugger console on top of GDB/MI
//!
//! Launches or attaches through the library's `Debugger` and offers a
//! line-oriented console for stepping, breakpoints and inspection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::{mpsc, Mutex};

use mi_debugger::common::{config::Config, logging};
use mi_debugger::debugger::list_processes;
use mi_debugger::events::{OutputKind, OutputLine};
use mi_debugger::session::ExpiredCommand;
use mi_debugger::{
    DebugConfiguration, Debugger, DebuggerEvent, Error, FixedChoice, FsSources, Result,
    SessionState, StopSnapshot, TimeoutPrompt, WaitOutcome, WatchdogChoice,
};

#[derive(Parser)]
#[command(name = "mi-debugger", about = "Interactive debugger for GDB/MI")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file to use instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write the debugger command/response log to a file
    #[arg(long, global = true)]
    log_file: bool,

    /// Print events and results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a program under the debugger
    Run {
        /// Program to debug (or use --profile)
        program: Option<PathBuf>,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,

        /// Launch a stored debug configuration
        #[arg(long, short)]
        profile: Option<String>,

        /// Working directory of the program
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Breakpoint to set before starting (file:line), repeatable
        #[arg(long = "break", short = 'b')]
        breakpoints: Vec<String>,

        /// Answer unresponsive-debugger prompts automatically
        #[arg(long, value_enum)]
        on_timeout: Option<TimeoutAction>,
    },

    /// Attach to a running process
    Attach {
        /// Process ID to attach to
        pid: u32,

        /// Answer unresponsive-debugger prompts automatically
        #[arg(long, value_enum)]
        on_timeout: Option<TimeoutAction>,
    },

    /// List processes that can be attached to
    Ps {
        /// Only show processes whose name or command line contains this
        filter: Option<String>,
    },

    /// List stored debug configurations
    Configs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimeoutAction {
    Wait,
    Abort,
}

impl From<TimeoutAction> for WatchdogChoice {
    fn from(action: TimeoutAction) -> Self {
        match action {
            TimeoutAction::Wait => WatchdogChoice::WaitLonger,
            TimeoutAction::Abort => WatchdogChoice::Abort,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.log_file {
        if let Some(path) = logging::init_with_file() {
            eprintln!("Logging to {}", path.display());
        }
    } else {
        logging::init_cli();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Ps { filter } => {
            let processes = list_processes(filter.as_deref());
            if cli.json {
                println!("{}", serde_json::to_string(&processes)?);
            } else {
                for p in processes {
                    println!("{:>7}  {:<20} {}", p.pid, p.name, p.cmd);
                }
            }
            Ok(())
        }

        Commands::Configs => {
            if cli.json {
                println!("{}", serde_json::to_string(&config.configurations)?);
            } else if config.configurations.is_empty() {
                println!("No debug configurations");
            } else {
                for cfg in &config.configurations {
                    println!("{}: {} {}", cfg.name, cfg.program.display(), cfg.args.join(" "));
                }
            }
            Ok(())
        }

        Commands::Run {
            program,
            args,
            profile,
            cwd,
            breakpoints,
            on_timeout,
        } => {
            let lines = spawn_stdin_reader();
            let (mut debugger, events) = new_debugger(config, on_timeout, &lines);
            tokio::spawn(print_events(events, cli.json));

            let mut profile = match (profile, program) {
                (Some(name), _) => debugger
                    .configurations()
                    .get(&name)
                    .cloned()
                    .ok_or(Error::ConfigurationNotFound(name))?,
                (None, Some(program)) => {
                    let name = program
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "program".to_string());
                    DebugConfiguration::new(name, program).with_args(args)
                }
                (None, None) => {
                    return Err(Error::Config(
                        "Either a program or --profile is required".to_string(),
                    ))
                }
            };
            if let Some(dir) = cwd {
                profile = profile.with_working_dir(dir);
            }

            for location in &breakpoints {
                let (file, line) = parse_location(location).map_err(Error::Config)?;
                debugger.add_breakpoint(file, line, None, 0).await?;
            }

            debugger.launch(&profile).await?;
            println!("Started debugging: {}", profile.program.display());
            console(&mut debugger, lines, cli.json).await
        }

        Commands::Attach { pid, on_timeout } => {
            let lines = spawn_stdin_reader();
            let (mut debugger, events) = new_debugger(config, on_timeout, &lines);
            tokio::spawn(print_events(events, cli.json));

            debugger.attach(pid).await?;
            println!("Attached to process {}", pid);
            console(&mut debugger, lines, cli.json).await
        }
    }
}

type Lines = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

/// Read stdin on a plain thread; the console and the timeout prompt share
/// the lines
fn spawn_stdin_reader() -> Lines {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

fn new_debugger(
    config: Config,
    on_timeout: Option<TimeoutAction>,
    lines: &Lines,
) -> (Debugger, mpsc::UnboundedReceiver<DebuggerEvent>) {
    let prompt: Arc<dyn TimeoutPrompt> = match on_timeout {
        Some(action) => Arc::new(FixedChoice(action.into())),
        None => Arc::new(StdinPrompt {
            lines: Arc::clone(lines),
        }),
    };
    Debugger::new(config, Arc::new(FsSources::new()), prompt)
}

/// Asks on the terminal whether to keep waiting for the debugger
struct StdinPrompt {
    lines: Lines,
}

#[async_trait]
impl TimeoutPrompt for StdinPrompt {
    async fn on_expire(&self, command: &ExpiredCommand) -> WatchdogChoice {
        eprintln!(
            "The debugger has not answered '{}' for {}s. [w]ait longer or [a]bort the session?",
            command.operation,
            command.waited.as_secs()
        );
        let mut lines = self.lines.lock().await;
        match lines.recv().await {
            Some(answer) if answer.trim().starts_with(['w', 'W']) => WatchdogChoice::WaitLonger,
            _ => WatchdogChoice::Abort,
        }
    }
}

// === Console ===

/// A command typed at the console
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Continue,
    Next,
    Step,
    Finish,
    Interrupt,
    Wait(Option<u64>),
    Break {
        file: PathBuf,
        line: u32,
        condition: Option<String>,
    },
    Delete(u32),
    Enable(u32),
    Disable(u32),
    Condition(u32, Option<String>),
    Ignore(u32, u32),
    Breakpoints,
    Backtrace,
    Locals,
    Frame(usize),
    Threads,
    Thread(u32),
    Print(String),
    Output(usize),
    Raw(String),
    Status,
    Detach,
    Help,
    Quit,
}

const HELP: &str = "\
Execution:   continue (c), next (n), step (s), finish, interrupt, wait [secs]
Breakpoints: break <file:line> [if <cond>], delete <id>, enable <id>, disable <id>,
             condition <id> [expr], ignore <id> <count>, breakpoints (bl)
Inspection:  backtrace (bt), locals, frame <n>, threads, thread <id>, print <expr>,
             output [lines], status
Debugger:    mi <command> (or any line starting with '-'), detach, quit (q)";

/// Parse one console line; `Ok(None)` for blank lines
fn parse_command(line: &str) -> std::result::Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with('-') {
        return Ok(Some(ConsoleCommand::Raw(line.to_string())));
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let id = |what: &str| -> std::result::Result<u32, String> {
        rest.split_whitespace()
            .next()
            .ok_or_else(|| format!("{} requires a breakpoint id", what))?
            .parse()
            .map_err(|_| format!("Invalid breakpoint id: {}", rest))
    };

    let command = match word {
        "continue" | "c" => ConsoleCommand::Continue,
        "next" | "n" => ConsoleCommand::Next,
        "step" | "s" => ConsoleCommand::Step,
        "finish" | "out" => ConsoleCommand::Finish,
        "interrupt" | "pause" => ConsoleCommand::Interrupt,
        "wait" => ConsoleCommand::Wait(if rest.is_empty() {
            None
        } else {
            Some(rest.parse().map_err(|_| format!("Invalid timeout: {}", rest))?)
        }),
        "break" | "b" => {
            let (location, condition) = match rest.split_once(" if ") {
                Some((location, condition)) => (location.trim(), Some(condition.trim().to_string())),
                None => (rest, None),
            };
            let (file, line) = parse_location(location)?;
            ConsoleCommand::Break {
                file,
                line,
                condition,
            }
        }
        "delete" | "d" => ConsoleCommand::Delete(id("delete")?),
        "enable" => ConsoleCommand::Enable(id("enable")?),
        "disable" => ConsoleCommand::Disable(id("disable")?),
        "condition" => {
            let id = id("condition")?;
            let expr = rest
                .split_once(char::is_whitespace)
                .map(|(_, expr)| expr.trim().to_string())
                .filter(|expr| !expr.is_empty());
            ConsoleCommand::Condition(id, expr)
        }
        "ignore" => {
            let mut parts = rest.split_whitespace();
            let (Some(id), Some(count)) = (parts.next(), parts.next()) else {
                return Err("Usage: ignore <id> <count>".to_string());
            };
            ConsoleCommand::Ignore(
                id.parse().map_err(|_| format!("Invalid breakpoint id: {}", id))?,
                count.parse().map_err(|_| format!("Invalid count: {}", count))?,
            )
        }
        "breakpoints" | "bl" => ConsoleCommand::Breakpoints,
        "backtrace" | "bt" => ConsoleCommand::Backtrace,
        "locals" => ConsoleCommand::Locals,
        "frame" | "f" => ConsoleCommand::Frame(
            rest.parse()
                .map_err(|_| "Usage: frame <level>".to_string())?,
        ),
        "threads" => ConsoleCommand::Threads,
        "thread" => ConsoleCommand::Thread(
            rest.parse()
                .map_err(|_| "Usage: thread <id>".to_string())?,
        ),
        "print" | "p" if !rest.is_empty() => ConsoleCommand::Print(rest.to_string()),
        "print" | "p" => return Err("Usage: print <expression>".to_string()),
        "output" => ConsoleCommand::Output(if rest.is_empty() {
            20
        } else {
            rest.parse().map_err(|_| format!("Invalid line count: {}", rest))?
        }),
        "mi" if !rest.is_empty() => ConsoleCommand::Raw(rest.to_string()),
        "mi" => return Err("Usage: mi <command>".to_string()),
        "status" => ConsoleCommand::Status,
        "detach" => ConsoleCommand::Detach,
        "help" | "h" | "?" => ConsoleCommand::Help,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("Unknown command: {} (try 'help')", other)),
    };
    Ok(Some(command))
}

/// Parse `file:line`
fn parse_location(location: &str) -> std::result::Result<(PathBuf, u32), String> {
    let (file, line) = location
        .rsplit_once(':')
        .ok_or_else(|| format!("Expected file:line, got '{}'", location))?;
    if file.is_empty() {
        return Err(format!("Expected file:line, got '{}'", location));
    }
    let line = line
        .parse()
        .map_err(|_| format!("Invalid line number: {}", line))?;
    Ok((PathBuf::from(file), line))
}

/// Read commands until `quit` or end of input
///
/// While waiting for input the session's events are handled, so stops
/// show up without typing anything.
async fn console(debugger: &mut Debugger, lines: Lines, json: bool) -> Result<()> {
    loop {
        let next = {
            let mut lines = lines.lock().await;
            tokio::select! {
                line = lines.recv() => Some(line),
                _ = tokio::time::sleep(Duration::from_millis(100)) => None,
            }
        };

        match next {
            Some(Some(line)) => match parse_command(&line) {
                Ok(Some(ConsoleCommand::Quit)) => break,
                Ok(Some(command)) => {
                    if let Err(e) = execute(debugger, command, json).await {
                        eprintln!("Error: {e}");
                    }
                }
                Ok(None) => {}
                Err(message) => eprintln!("{}", message),
            },
            Some(None) => break,
            None => {
                if debugger.session().is_some() {
                    if let Err(e) = debugger.process_events().await {
                        tracing::debug!(error = %e, "Processing events failed");
                    }
                }
            }
        }
    }

    debugger.terminate().await;
    Ok(())
}

async fn execute(debugger: &mut Debugger, command: ConsoleCommand, json: bool) -> Result<()> {
    match command {
        ConsoleCommand::Continue => debugger.continue_execution().await?,
        ConsoleCommand::Next => debugger.next().await?,
        ConsoleCommand::Step => debugger.step().await?,
        ConsoleCommand::Finish => debugger.finish().await?,
        ConsoleCommand::Interrupt => debugger.interrupt().await?,

        ConsoleCommand::Wait(secs) => {
            match debugger.wait_for_stop(secs.map(Duration::from_secs)).await? {
                // Fresh stops are printed from the event stream
                WaitOutcome::Stopped(_) => {}
                WaitOutcome::Exited(code) => match code {
                    Some(code) => println!("Program exited with code {}", code),
                    None => println!("Session ended"),
                },
                WaitOutcome::Crashed(signal) => match signal {
                    Some(signal) => println!("Debugger crashed (signal {})", signal),
                    None => println!("Debugger crashed"),
                },
            }
        }

        ConsoleCommand::Break {
            file,
            line,
            condition,
        } => {
            let id = debugger.add_breakpoint(file, line, condition, 0).await?;
            if let Some(bp) = debugger.breakpoints().get(id) {
                println!("Breakpoint {} at {}", id, bp.location());
            }
        }
        ConsoleCommand::Delete(id) => {
            debugger.remove_breakpoint(id).await?;
            println!("Breakpoint {} removed", id);
        }
        ConsoleCommand::Enable(id) => {
            debugger.set_breakpoint_enabled(id, true).await?;
            println!("Breakpoint {} enabled", id);
        }
        ConsoleCommand::Disable(id) => {
            debugger.set_breakpoint_enabled(id, false).await?;
            println!("Breakpoint {} disabled", id);
        }
        ConsoleCommand::Condition(id, condition) => {
            debugger.set_breakpoint_condition(id, condition).await?;
        }
        ConsoleCommand::Ignore(id, count) => {
            debugger.set_breakpoint_ignore_count(id, count).await?;
        }
        ConsoleCommand::Breakpoints => {
            let breakpoints: Vec<_> = debugger.breakpoints().list().cloned().collect();
            if json {
                println!("{}", serde_json::to_string(&breakpoints)?);
            } else if breakpoints.is_empty() {
                println!("No breakpoints set");
            } else {
                for bp in breakpoints {
                    let state = if bp.enabled { "enabled" } else { "disabled" };
                    print!("  {} {} [{}] {:?}", bp.id, bp.location(), state, bp.sync);
                    if let Some(cond) = &bp.condition {
                        print!(" if {}", cond);
                    }
                    println!();
                }
            }
        }

        ConsoleCommand::Backtrace => {
            let frames = debugger.stack().await?;
            if json {
                println!("{}", serde_json::to_string(&frames)?);
            } else if frames.is_empty() {
                println!("No stack frames");
            } else {
                for frame in frames {
                    println!("#{} {}", frame.level, frame.location());
                }
            }
        }
        ConsoleCommand::Locals => {
            let locals = debugger.locals().await?;
            print_locals(&locals, json)?;
        }
        ConsoleCommand::Frame(level) => {
            let locals = debugger.select_frame(level).await?;
            println!("Switched to frame {}", level);
            print_locals(&locals, json)?;
        }
        ConsoleCommand::Threads => {
            let threads = debugger.threads().await?;
            if json {
                println!("{}", serde_json::to_string(&threads)?);
            } else {
                for thread in threads {
                    let marker = if thread.current { "*" } else { " " };
                    let name = thread
                        .name
                        .or(thread.target_id)
                        .unwrap_or_default();
                    println!("{} {} {}", marker, thread.id, name);
                }
            }
        }
        ConsoleCommand::Thread(id) => {
            let frames = debugger.select_thread(id).await?;
            println!("Switched to thread {}", id);
            if let Some(frame) = frames.first() {
                println!("  at {}", frame.location());
            }
        }
        ConsoleCommand::Print(expression) => {
            println!("{}", debugger.evaluate(&expression).await?);
        }
        ConsoleCommand::Output(count) => {
            let session = debugger.session().ok_or(Error::NoSession)?;
            let lines: Vec<&OutputLine> = session.output().collect();
            let skip = lines.len().saturating_sub(count);
            for line in &lines[skip..] {
                println!("{}", line.text);
            }
        }
        ConsoleCommand::Raw(input) => {
            let reply = debugger.raw(&input).await?;
            match reply.error_message() {
                Some(message) => eprintln!("^error: {}", message),
                None if reply.results().is_empty() => println!("^done"),
                None => println!("{}", serde_json::to_string(reply.results())?),
            }
        }
        ConsoleCommand::Status => {
            let state = debugger.state();
            println!("Session: {}", state);
            if let Some(stop) = debugger.session().and_then(|s| s.last_stop()) {
                print_stop(stop);
            }
        }
        ConsoleCommand::Detach => {
            debugger.detach().await?;
            println!("Detached");
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn print_locals(
    locals: &std::collections::BTreeMap<String, mi_debugger::mi::LocalVariable>,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(locals)?);
    } else if locals.is_empty() {
        println!("No local variables");
    } else {
        for local in locals.values() {
            let type_name = local.type_name.as_deref().unwrap_or("?");
            println!("  {} {} = {}", type_name, local.name, local.value);
        }
    }
    Ok(())
}

fn print_stop(stop: &StopSnapshot) {
    match stop.breakpoint {
        Some(id) => println!("Stopped: {} (breakpoint {})", stop.reason, id),
        None => println!("Stopped: {}", stop.reason),
    }
    if let Some(frame) = stop.top_frame() {
        println!("  at {}", frame.location());
    }
    for local in stop.locals.values() {
        println!("  {} = {}", local.name, local.value);
    }
}

/// Render notifications until the debugger goes away
async fn print_events(mut events: mpsc::UnboundedReceiver<DebuggerEvent>, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
            }
            continue;
        }
        match event {
            DebuggerEvent::Stopped(stop) => print_stop(&stop),
            DebuggerEvent::Output(OutputLine { kind, text }) => match kind {
                OutputKind::Target | OutputKind::Console => println!("{}", text),
                OutputKind::Log | OutputKind::Stderr | OutputKind::Raw => {
                    tracing::debug!(?kind, "{}", text)
                }
            },
            DebuggerEvent::StateChanged { to, .. } => match to {
                SessionState::Exited => println!("Session ended"),
                SessionState::Crashed => println!("Debugger crashed"),
                _ => {}
            },
            DebuggerEvent::CommandTimedOut {
                operation,
                waited_secs,
            } => eprintln!("'{}' has been waiting for {}s", operation, waited_secs),
            DebuggerEvent::BreakpointsChanged => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ConsoleCommand {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn test_execution_commands() {
        assert_eq!(parse("c"), ConsoleCommand::Continue);
        assert_eq!(parse("  next "), ConsoleCommand::Next);
        assert_eq!(parse("wait"), ConsoleCommand::Wait(None));
        assert_eq!(parse("wait 30"), ConsoleCommand::Wait(Some(30)));
        assert!(parse_command("").unwrap().is_none());
    }

    #[test]
    fn test_break_with_condition() {
        assert_eq!(
            parse("break src/Model.mo:42 if x > 1"),
            ConsoleCommand::Break {
                file: PathBuf::from("src/Model.mo"),
                line: 42,
                condition: Some("x > 1".to_string()),
            }
        );
        assert!(parse_command("break Model.mo").is_err());
        assert!(parse_command("break :3").is_err());
    }

    #[test]
    fn test_breakpoint_edits() {
        assert_eq!(parse("delete 3"), ConsoleCommand::Delete(3));
        assert_eq!(
            parse("condition 2 i == 4"),
            ConsoleCommand::Condition(2, Some("i == 4".to_string()))
        );
        assert_eq!(parse("condition 2"), ConsoleCommand::Condition(2, None));
        assert_eq!(parse("ignore 1 5"), ConsoleCommand::Ignore(1, 5));
        assert!(parse_command("ignore 1").is_err());
        assert!(parse_command("enable x").is_err());
    }

    #[test]
    fn test_raw_commands() {
        assert_eq!(
            parse("-break-list"),
            ConsoleCommand::Raw("-break-list".to_string())
        );
        assert_eq!(
            parse("mi info registers"),
            ConsoleCommand::Raw("info registers".to_string())
        );
        assert!(parse_command("mi").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_command("frobnicate").unwrap_err();
        assert!(err.contains("Unknown command"));
    }

    #[test]
    fn test_parse_location_windows_drive() {
        assert_eq!(
            parse_location("C:\\src\\a.c:7").unwrap(),
            (PathBuf::from("C:\\src\\a.c"), 7)
        );
    }
}
