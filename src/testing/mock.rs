//! Scripted GDB/MI responder
//!
//! Answers the subset of MI the adapter issues, with a fake program that
//! stops at breakpoints in number order. Behaviour switches:
//!
//! - `--hang <operation>`: never answer that operation
//! - `--crash-on <operation>`: die when that operation arrives
//! - `--deny-attach`: refuse `-target-attach`
//! - `--no-stop`: execution never stops on its own (for interrupts)

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::mi::codec::{decode_command, encode_record};
use crate::mi::{AsyncKind, MiCommand, MiResult, Record, ResultClass, StreamKind, Token, Value};

/// Behaviour switches of the mock
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub hang_on: HashSet<String>,
    pub crash_on: HashSet<String>,
    pub deny_attach: bool,
    pub no_stop: bool,
}

impl MockOptions {
    /// Parse switches from a command line; unknown arguments are ignored
    /// so real debugger arguments like `--interpreter=mi2` pass through
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Self {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--hang" => options.hang_on.extend(args.next()),
                "--crash-on" => options.crash_on.extend(args.next()),
                "--deny-attach" => options.deny_attach = true,
                "--no-stop" => options.no_stop = true,
                _ => {}
            }
        }
        options
    }

    pub fn hang(mut self, operation: &str) -> Self {
        self.hang_on.insert(operation.to_string());
        self
    }

    pub fn crash_on(mut self, operation: &str) -> Self {
        self.crash_on.insert(operation.to_string());
        self
    }
}

/// What the driver does after writing a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAction {
    Continue,
    /// Close the output and exit normally
    Exit,
    /// Die abnormally
    Crash,
}

#[derive(Debug)]
pub struct MockResponse {
    pub lines: Vec<String>,
    pub action: MockAction,
}

#[derive(Debug, Clone)]
struct MockBreakpoint {
    location: String,
    file: String,
    line: u32,
    enabled: bool,
    condition: Option<String>,
    ignore: u32,
    times: u32,
}

/// State of the fake debugger
#[derive(Debug)]
pub struct MockGdb {
    options: MockOptions,
    breakpoints: BTreeMap<u32, MockBreakpoint>,
    next_number: u32,
    program: Option<String>,
    /// Breakpoint number of the last stop; 0 before the first one
    last_hit: u32,
    file: String,
    line: u32,
    alive: bool,
}

impl MockGdb {
    pub fn new(options: MockOptions) -> Self {
        Self {
            options,
            breakpoints: BTreeMap::new(),
            next_number: 1,
            program: None,
            last_hit: 0,
            file: "main.c".to_string(),
            line: 1,
            alive: false,
        }
    }

    /// Lines printed at startup
    pub fn banner(&self) -> Vec<String> {
        vec![
            encode_record(&notify("thread-group-added", vec![("id", c("i1"))])),
            encode_record(&Record::Prompt),
        ]
    }

    /// Answer one input line
    pub fn handle_line(&mut self, line: &str) -> MockResponse {
        let line = line.trim_end();
        if line.is_empty() {
            return respond(vec![encode_record(&Record::Prompt)]);
        }

        let (token, command) = match decode_command(line) {
            Ok(parsed) => parsed,
            Err(_) => {
                return respond(finish(vec![error(
                    None,
                    &format!("Undefined command: \"{}\".", line),
                )]))
            }
        };

        if self.options.crash_on.contains(&command.operation) || command.operation == "mock-crash" {
            return MockResponse {
                lines: Vec::new(),
                action: MockAction::Crash,
            };
        }
        if self.options.hang_on.contains(&command.operation) {
            return respond(Vec::new());
        }
        if command.operation == "gdb-exit" {
            return MockResponse {
                lines: vec![encode_record(&result(token, ResultClass::Exit, Vec::new()))],
                action: MockAction::Exit,
            };
        }

        respond(finish(self.dispatch(token, &command)))
    }

    fn dispatch(&mut self, token: Option<Token>, command: &MiCommand) -> Vec<Record> {
        let args = &command.args;
        match command.operation.as_str() {
            "gdb-set" | "environment-cd" | "exec-arguments" | "thread-select"
            | "stack-select-frame" => vec![done(token)],
            "file-exec-and-symbols" => match args.first() {
                Some(path) if Path::new(path).exists() => {
                    self.program = Some(path.clone());
                    vec![done(token)]
                }
                Some(path) => vec![error(token, &format!("{}: No such file or directory.", path))],
                None => vec![error(token, "Argument required (file name).")],
            },
            "break-insert" => self.break_insert(token, args),
            "break-delete" => self.update_breakpoints(token, args, |bps, n| bps.remove(&n).is_some()),
            "break-enable" => self.update_breakpoints(token, args, |bps, n| set_enabled(bps, n, true)),
            "break-disable" => {
                self.update_breakpoints(token, args, |bps, n| set_enabled(bps, n, false))
            }
            "break-after" => {
                let count = args.get(1).and_then(|c| c.parse().ok()).unwrap_or(0);
                self.update_breakpoints(token, &args[..args.len().min(1)], |bps, n| {
                    bps.get_mut(&n).map(|bp| bp.ignore = count).is_some()
                })
            }
            "break-condition" => {
                let condition = (args.len() > 1).then(|| args[1..].join(" "));
                self.update_breakpoints(token, &args[..args.len().min(1)], |bps, n| {
                    bps.get_mut(&n).map(|bp| bp.condition = condition.clone()).is_some()
                })
            }
            "exec-run" => {
                if self.program.is_none() {
                    return vec![error(token, "No executable file specified.")];
                }
                self.alive = true;
                self.last_hit = 0;
                let mut records = vec![
                    notify("thread-group-started", vec![("id", c("i1")), ("pid", c("4242"))]),
                    result(token, ResultClass::Running, Vec::new()),
                    running(),
                    Record::Stream {
                        kind: StreamKind::Target,
                        text: "program started\n".to_string(),
                    },
                ];
                records.extend(self.advance());
                records
            }
            "exec-continue" => self.resume(token, |mock| mock.advance()),
            "exec-next" | "exec-step" => self.resume(token, |mock| {
                mock.line += 1;
                vec![mock.stop(vec![("reason", c("end-stepping-range"))], "compute")]
            }),
            "exec-finish" => self.resume(token, |mock| {
                mock.line = 10;
                vec![mock.stop(vec![("reason", c("function-finished"))], "main")]
            }),
            "exec-interrupt" => vec![
                done(token),
                self.stop(
                    vec![
                        ("reason", c("signal-received")),
                        ("signal-name", c("SIGINT")),
                        ("signal-meaning", c("Interrupt")),
                    ],
                    "compute",
                ),
            ],
            "target-attach" => {
                if self.options.deny_attach {
                    return vec![error(token, "ptrace: Operation not permitted.")];
                }
                self.alive = true;
                let pid = args.first().cloned().unwrap_or_default();
                vec![
                    notify("thread-group-started", vec![("id", c("i1")), ("pid", c(&pid))]),
                    done(token),
                    self.stop(Vec::new(), "compute"),
                ]
            }
            "target-detach" => {
                self.alive = false;
                vec![
                    notify("thread-group-exited", vec![("id", c("i1"))]),
                    done(token),
                ]
            }
            "thread-info" => vec![result(
                token,
                ResultClass::Done,
                results(vec![
                    (
                        "threads",
                        Value::List(vec![
                            tuple(vec![
                                ("id", c("1")),
                                ("target-id", c("process 4242")),
                                ("frame", self.frame(0, "compute")),
                                ("state", c("stopped")),
                            ]),
                            tuple(vec![
                                ("id", c("2")),
                                ("target-id", c("Thread 0x7ffff7d8a640")),
                                ("name", c("worker")),
                                ("state", c("stopped")),
                            ]),
                        ]),
                    ),
                    ("current-thread-id", c("1")),
                ]),
            )],
            "stack-list-frames" => vec![result(
                token,
                ResultClass::Done,
                results(vec![(
                    "stack",
                    Value::ResultList(vec![
                        ("frame".to_string(), self.frame(0, "compute")),
                        ("frame".to_string(), self.caller_frame()),
                    ]),
                )]),
            )],
            "stack-list-variables" => vec![result(
                token,
                ResultClass::Done,
                results(vec![(
                    "variables",
                    Value::List(vec![
                        tuple(vec![
                            ("name", c("n")),
                            ("arg", c("1")),
                            ("type", c("int")),
                            ("value", c("3")),
                        ]),
                        tuple(vec![("name", c("x")), ("type", c("int")), ("value", c("42"))]),
                        tuple(vec![("name", c("point")), ("type", c("struct point"))]),
                        tuple(vec![
                            ("name", c("ratio")),
                            ("type", c("double")),
                            ("value", c("<optimized out>")),
                        ]),
                        tuple(vec![("name", c("pending")), ("type", c("struct job"))]),
                    ]),
                )]),
            )],
            "data-evaluate-expression" => {
                let expression = args.last().map(String::as_str).unwrap_or_default();
                match expression {
                    "x" => vec![value(token, "42")],
                    "n" => vec![value(token, "3")],
                    "x + n" => vec![value(token, "45")],
                    "point" => vec![value(token, "{x = 1, y = 2}")],
                    "pending" => vec![error(token, "Cannot access memory at address 0x0")],
                    other => vec![error(
                        token,
                        &format!("No symbol \"{}\" in current context.", other),
                    )],
                }
            }
            "interpreter-exec" => {
                let text = args.last().cloned().unwrap_or_default();
                vec![
                    Record::Stream {
                        kind: StreamKind::Console,
                        text: format!("{}\n", text),
                    },
                    done(token),
                ]
            }
            other => vec![error(token, &format!("Undefined MI command: {}", other))],
        }
    }

    fn break_insert(&mut self, token: Option<Token>, args: &[String]) -> Vec<Record> {
        let mut enabled = true;
        let mut condition = None;
        let mut ignore = 0;
        let mut location = None;
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-d" => enabled = false,
                "-c" => condition = args.next().cloned(),
                "-i" => ignore = args.next().and_then(|i| i.parse().ok()).unwrap_or(0),
                "-f" => {}
                other => location = Some(other.to_string()),
            }
        }

        let Some(location) = location else {
            return vec![error(token, "-break-insert: Missing <location>")];
        };
        let Some((path, line)) = location
            .rsplit_once(':')
            .and_then(|(path, line)| Some((path, line.parse::<u32>().ok()?)))
        else {
            return vec![error(token, &format!("Function \"{}\" not defined.", location))];
        };
        if path.contains("nosuch") || line == 0 {
            return vec![error(token, &format!("No source file named {}.", path))];
        }

        let number = self.next_number;
        self.next_number += 1;
        let file = Path::new(path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let bp = MockBreakpoint {
            location: path.to_string(),
            file,
            line,
            enabled,
            condition,
            ignore,
            times: 0,
        };
        let tuple = bkpt_tuple(number, &bp);
        self.breakpoints.insert(number, bp);
        vec![result(token, ResultClass::Done, vec![("bkpt".to_string(), tuple)])]
    }

    fn update_breakpoints<F>(&mut self, token: Option<Token>, numbers: &[String], mut apply: F) -> Vec<Record>
    where
        F: FnMut(&mut BTreeMap<u32, MockBreakpoint>, u32) -> bool,
    {
        for number in numbers {
            let found = number
                .parse()
                .ok()
                .map(|n| apply(&mut self.breakpoints, n))
                .unwrap_or(false);
            if !found {
                return vec![error(token, &format!("No breakpoint number {}.", number))];
            }
        }
        vec![done(token)]
    }

    fn resume<F>(&mut self, token: Option<Token>, then: F) -> Vec<Record>
    where
        F: FnOnce(&mut Self) -> Vec<Record>,
    {
        if !self.alive {
            return vec![error(token, "The program is not being run.")];
        }
        let mut records = vec![result(token, ResultClass::Running, Vec::new()), running()];
        if !self.options.no_stop {
            records.extend(then(self));
        }
        records
    }

    /// Run to the next enabled breakpoint after the last hit, or to the end
    fn advance(&mut self) -> Vec<Record> {
        if self.options.no_stop {
            return Vec::new();
        }
        let next = self
            .breakpoints
            .iter_mut()
            .filter(|(n, bp)| **n > self.last_hit && bp.enabled)
            .find_map(|(n, bp)| {
                if bp.ignore > 0 {
                    bp.ignore -= 1;
                    None
                } else {
                    bp.times += 1;
                    Some((*n, bp.location.clone(), bp.line))
                }
            });

        match next {
            Some((number, location, line)) => {
                self.last_hit = number;
                self.file = location;
                self.line = line;
                vec![self.stop(
                    vec![
                        ("reason", c("breakpoint-hit")),
                        ("disp", c("keep")),
                        ("bkptno", c(&number.to_string())),
                    ],
                    "compute",
                )]
            }
            None => {
                self.alive = false;
                vec![
                    notify("thread-group-exited", vec![("id", c("i1")), ("exit-code", c("0"))]),
                    Record::Async {
                        token: None,
                        kind: AsyncKind::Exec,
                        class: "stopped".to_string(),
                        results: results(vec![("reason", c("exited-normally"))]),
                    },
                ]
            }
        }
    }

    fn stop(&self, mut fields: Vec<(&str, Value)>, func: &str) -> Record {
        fields.push(("frame", self.frame_without_level(func)));
        fields.push(("thread-id", c("1")));
        fields.push(("stopped-threads", c("all")));
        Record::Async {
            token: None,
            kind: AsyncKind::Exec,
            class: "stopped".to_string(),
            results: results(fields),
        }
    }

    fn frame_fields(&self, func: &str) -> Vec<(&'static str, Value)> {
        let file = Path::new(&self.file)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.clone());
        vec![
            ("addr", c("0x0000000000401136")),
            ("func", c(func)),
            ("args", Value::List(Vec::new())),
            ("file", c(&file)),
            ("fullname", c(&self.file)),
            ("line", c(&self.line.to_string())),
        ]
    }

    fn frame_without_level(&self, func: &str) -> Value {
        tuple(self.frame_fields(func))
    }

    fn frame(&self, level: usize, func: &str) -> Value {
        let mut fields = vec![("level", c(&level.to_string()))];
        fields.extend(self.frame_fields(func));
        tuple(fields)
    }

    fn caller_frame(&self) -> Value {
        tuple(vec![
            ("level", c("1")),
            ("addr", c("0x0000000000401190")),
            ("func", c("main")),
            ("file", c("main.c")),
            ("fullname", c("/src/main.c")),
            ("line", c("10")),
        ])
    }
}

fn set_enabled(bps: &mut BTreeMap<u32, MockBreakpoint>, number: u32, enabled: bool) -> bool {
    bps.get_mut(&number).map(|bp| bp.enabled = enabled).is_some()
}

fn bkpt_tuple(number: u32, bp: &MockBreakpoint) -> Value {
    let mut fields = vec![
        ("number", c(&number.to_string())),
        ("type", c("breakpoint")),
        ("disp", c("keep")),
        ("enabled", c(if bp.enabled { "y" } else { "n" })),
        ("addr", c("0x0000000000401136")),
        ("func", c("compute")),
        ("file", c(&bp.file)),
        ("fullname", c(&bp.location)),
        ("line", c(&bp.line.to_string())),
    ];
    if let Some(cond) = &bp.condition {
        fields.push(("cond", c(cond)));
    }
    if bp.ignore > 0 {
        fields.push(("ignore", c(&bp.ignore.to_string())));
    }
    fields.push(("times", c(&bp.times.to_string())));
    fields.push((
        "original-location",
        c(&format!("{}:{}", bp.location, bp.line)),
    ));
    tuple(fields)
}

fn c(s: &str) -> Value {
    Value::Const(s.to_string())
}

fn results(fields: Vec<(&str, Value)>) -> Vec<MiResult> {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn tuple(fields: Vec<(&str, Value)>) -> Value {
    Value::Tuple(results(fields))
}

fn result(token: Option<Token>, class: ResultClass, results: Vec<MiResult>) -> Record {
    Record::Result {
        token,
        class,
        results,
    }
}

fn done(token: Option<Token>) -> Record {
    result(token, ResultClass::Done, Vec::new())
}

fn value(token: Option<Token>, text: &str) -> Record {
    result(token, ResultClass::Done, results(vec![("value", c(text))]))
}

fn error(token: Option<Token>, message: &str) -> Record {
    result(token, ResultClass::Error, results(vec![("msg", c(message))]))
}

fn notify(class: &str, fields: Vec<(&str, Value)>) -> Record {
    Record::Async {
        token: None,
        kind: AsyncKind::Notify,
        class: class.to_string(),
        results: results(fields),
    }
}

fn running() -> Record {
    Record::Async {
        token: None,
        kind: AsyncKind::Exec,
        class: "running".to_string(),
        results: results(vec![("thread-id", c("all"))]),
    }
}

/// Close an output block with the prompt
fn finish(records: Vec<Record>) -> Vec<String> {
    records
        .iter()
        .chain(std::iter::once(&Record::Prompt))
        .map(encode_record)
        .collect()
}

fn respond(lines: Vec<String>) -> MockResponse {
    MockResponse {
        lines,
        action: MockAction::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::codec::parse;

    fn records(mock: &mut MockGdb, line: &str) -> Vec<Record> {
        mock.handle_line(line)
            .lines
            .iter()
            .map(|l| parse(l).unwrap())
            .collect()
    }

    #[test]
    fn test_break_insert_reply() {
        let mut mock = MockGdb::new(MockOptions::default());
        let out = records(&mut mock, "1-break-insert -c \"x > 1\" -f /src/Model.mo:42");
        match &out[0] {
            Record::Result {
                token: Some(1),
                class: ResultClass::Done,
                results,
            } => {
                let bkpt = &results[0].1;
                assert_eq!(bkpt.get_str("number"), Some("1"));
                assert_eq!(bkpt.get_str("file"), Some("Model.mo"));
                assert_eq!(bkpt.get_str("cond"), Some("x > 1"));
            }
            other => panic!("Expected bkpt reply, got {:?}", other),
        }
        assert_eq!(out.last(), Some(&Record::Prompt));
    }

    #[test]
    fn test_run_stops_at_breakpoint_then_exits() {
        let mut mock = MockGdb::new(MockOptions::default());
        records(&mut mock, "1-file-exec-and-symbols /");
        records(&mut mock, "2-break-insert -f a.c:5");
        let out = records(&mut mock, "3-exec-run");
        assert!(out.iter().any(|r| matches!(r,
            Record::Async { class, results, .. }
                if class == "stopped" && crate::mi::find_str(results, "bkptno") == Some("1"))));

        let out = records(&mut mock, "4-exec-continue");
        assert!(out.iter().any(|r| matches!(r,
            Record::Async { class, results, .. }
                if class == "stopped" && crate::mi::find_str(results, "reason") == Some("exited-normally"))));
    }

    #[test]
    fn test_switches() {
        let options = MockOptions::from_args(
            ["--interpreter=mi2", "--hang", "exec-next", "--deny-attach"]
                .iter()
                .map(|s| s.to_string()),
        );
        assert!(options.hang_on.contains("exec-next"));
        assert!(options.deny_attach);

        let mut mock = MockGdb::new(options.crash_on("exec-step"));
        assert!(mock.handle_line("5-exec-next").lines.is_empty());
        assert_eq!(mock.handle_line("6-exec-step").action, MockAction::Crash);
        assert_eq!(mock.handle_line("7-gdb-exit").action, MockAction::Exit);
    }
}
