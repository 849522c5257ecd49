//! GDB/MI wire codec
//!
//! MI is line oriented. Every command is a single line:
//! ```text
//! [token]-operation [option ...] [parameter ...]\n
//! ```
//! and every output line is one record:
//! ```text
//! [token]^done,bkpt={number="1",line="42"}     result record
//! *stopped,reason="breakpoint-hit",bkptno="1"  async record (also + and =)
//! ~"text\n"                                    stream record (also @ and &)
//! (gdb)                                        prompt
//! ```
//!
//! This module is the only place that knows the textual format. Everything
//! above it works on [`Record`] and [`MiCommand`].

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::commands::expected_reply_for;
use super::types::*;

/// A line that does not follow the MI output grammar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at column {column}")]
pub struct ParseError {
    pub message: String,
    pub column: usize,
}

/// Decode one output line. Never fails: a line that is not valid MI is
/// returned as a [`StreamKind::Raw`] stream record carrying the line verbatim.
pub fn decode(line: &str) -> Record {
    match parse(line) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(target: "mi_debugger::mi", line, error = %e, "Unparsable MI line");
            Record::Stream {
                kind: StreamKind::Raw,
                text: strip_newline(line).to_string(),
            }
        }
    }
}

/// Parse one output line strictly
pub fn parse(line: &str) -> Result<Record, ParseError> {
    let line = strip_newline(line);
    if line.trim_end() == "(gdb)" {
        return Ok(Record::Prompt);
    }

    let mut cur = Cursor::new(line);
    if cur.is_eof() {
        return Err(cur.error("empty line"));
    }

    let token = cur.token()?;
    match cur.bump() {
        Some('^') => {
            let name = cur.ident();
            let class = ResultClass::parse(name)
                .ok_or_else(|| cur.error(&format!("unknown result class '{}'", name)))?;
            let results = cur.results_tail()?;
            Ok(Record::Result {
                token,
                class,
                results,
            })
        }
        Some(c @ ('*' | '+' | '=')) => {
            let kind = match c {
                '*' => AsyncKind::Exec,
                '+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let class = cur.ident();
            if class.is_empty() {
                return Err(cur.error("missing async class"));
            }
            let class = class.to_string();
            let results = cur.results_tail()?;
            Ok(Record::Async {
                token,
                kind,
                class,
                results,
            })
        }
        Some(c @ ('~' | '@' | '&')) => {
            if token.is_some() {
                return Err(cur.error("stream records carry no token"));
            }
            let kind = match c {
                '~' => StreamKind::Console,
                '@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            let text = cur.c_string()?;
            cur.expect_eof()?;
            Ok(Record::Stream { kind, text })
        }
        _ => Err(cur.error("expected record prefix")),
    }
}

/// Serialize a command with its token, newline terminated
pub fn encode(token: Token, command: &MiCommand) -> String {
    format!("{}{}\n", token, command)
}

/// Parse an MI input line back into its token and command
pub fn decode_command(line: &str) -> Result<(Option<Token>, MiCommand), ParseError> {
    let mut cur = Cursor::new(strip_newline(line).trim_start());
    let token = cur.token()?;
    if !cur.eat('-') {
        return Err(cur.error("MI commands start with '-'"));
    }
    let operation = cur.take_while(|c| !c.is_whitespace());
    if operation.is_empty() {
        return Err(cur.error("missing operation"));
    }
    let operation = operation.to_string();

    let mut args = Vec::new();
    loop {
        cur.take_while(char::is_whitespace);
        match cur.peek() {
            None => break,
            Some('"') => args.push(cur.c_string()?),
            Some(_) => args.push(cur.take_while(|c| !c.is_whitespace()).to_string()),
        }
    }

    let expected = expected_reply_for(&operation);
    Ok((
        token,
        MiCommand {
            operation,
            args,
            expected,
        },
    ))
}

/// Serialize a record the way the debugger prints it
pub fn encode_record(record: &Record) -> String {
    let mut out = String::new();
    match record {
        Record::Result {
            token,
            class,
            results,
        } => {
            if let Some(t) = token {
                out.push_str(&t.to_string());
            }
            out.push('^');
            out.push_str(&class.to_string());
            push_results_tail(&mut out, results);
        }
        Record::Async {
            token,
            kind,
            class,
            results,
        } => {
            if let Some(t) = token {
                out.push_str(&t.to_string());
            }
            out.push(match kind {
                AsyncKind::Exec => '*',
                AsyncKind::Status => '+',
                AsyncKind::Notify => '=',
            });
            out.push_str(class);
            push_results_tail(&mut out, results);
        }
        Record::Stream { kind, text } => match kind {
            StreamKind::Raw => out.push_str(text),
            _ => {
                out.push(match kind {
                    StreamKind::Console => '~',
                    StreamKind::Target => '@',
                    _ => '&',
                });
                push_c_string(&mut out, text);
            }
        },
        Record::Prompt => out.push_str("(gdb) "),
    }
    out
}

/// Quote a command argument if the MI input grammar requires it
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c.is_control());
    if needs_quotes {
        let mut out = String::with_capacity(arg.len() + 2);
        push_c_string(&mut out, arg);
        out
    } else {
        arg.to_string()
    }
}

/// Read the next record from the debugger's stdout.
///
/// Returns `None` at end of stream. Invalid UTF-8 is replaced rather than
/// rejected so a single garbled byte never stalls the reader.
pub async fn read_record<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Record>> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&buf);
    tracing::trace!(target: "mi_debugger::mi", "MI <<< {}", strip_newline(&line));
    Ok(Some(decode(&line)))
}

// === Internals ===

fn strip_newline(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn push_results_tail(out: &mut String, results: &[MiResult]) {
    for (name, value) in results {
        out.push(',');
        push_result(out, name, value);
    }
}

fn push_result(out: &mut String, name: &str, value: &Value) {
    out.push_str(name);
    out.push('=');
    push_value(out, value);
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Const(s) => push_c_string(out, s),
        Value::Tuple(results) => {
            out.push('{');
            for (i, (name, v)) in results.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_result(out, name, v);
            }
            out.push('}');
        }
        Value::List(values) => {
            out.push('[');
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_value(out, v);
            }
            out.push(']');
        }
        Value::ResultList(results) => {
            out.push('[');
            for (i, (name, v)) in results.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_result(out, name, v);
            }
            out.push(']');
        }
    }
}

fn push_c_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_ascii_control() => {
                out.push_str(&format!("\\{:03o}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if self.is_eof() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }

    fn take_while(&mut self, f: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !f(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn ident(&mut self) -> &'a str {
        self.take_while(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            column: self.pos,
        }
    }

    fn token(&mut self) -> Result<Option<Token>, ParseError> {
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() {
            return Ok(None);
        }
        digits
            .parse()
            .map(Some)
            .map_err(|_| self.error("token out of range"))
    }

    fn results_tail(&mut self) -> Result<Vec<MiResult>, ParseError> {
        let mut results = Vec::new();
        while self.eat(',') {
            results.push(self.result()?);
        }
        self.expect_eof()?;
        Ok(results)
    }

    fn result(&mut self) -> Result<MiResult, ParseError> {
        let name = self.ident();
        if name.is_empty() {
            return Err(self.error("expected variable name"));
        }
        let name = name.to_string();
        self.expect('=')?;
        let value = self.value()?;
        Ok((name, value))
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            Some('"') => Ok(Value::Const(self.c_string()?)),
            Some('{') => {
                self.bump();
                let mut results = Vec::new();
                if self.eat('}') {
                    return Ok(Value::Tuple(results));
                }
                loop {
                    results.push(self.result()?);
                    if self.eat('}') {
                        return Ok(Value::Tuple(results));
                    }
                    self.expect(',')?;
                }
            }
            Some('[') => {
                self.bump();
                if self.eat(']') {
                    return Ok(Value::List(Vec::new()));
                }
                if matches!(self.peek(), Some('"' | '{' | '[')) {
                    let mut values = Vec::new();
                    loop {
                        values.push(self.value()?);
                        if self.eat(']') {
                            return Ok(Value::List(values));
                        }
                        self.expect(',')?;
                    }
                } else {
                    let mut results = Vec::new();
                    loop {
                        results.push(self.result()?);
                        if self.eat(']') {
                            return Ok(Value::ResultList(results));
                        }
                        self.expect(',')?;
                    }
                }
            }
            _ => Err(self.error("expected value")),
        }
    }

    /// Parse a C string, including the surrounding quotes
    fn c_string(&mut self) -> Result<String, ParseError> {
        self.expect('"')?;
        let mut bytes = Vec::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            match c {
                '"' => break,
                '\\' => {
                    let e = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    match e {
                        'n' => bytes.push(b'\n'),
                        't' => bytes.push(b'\t'),
                        'r' => bytes.push(b'\r'),
                        'a' => bytes.push(0x07),
                        'b' => bytes.push(0x08),
                        'f' => bytes.push(0x0c),
                        'v' => bytes.push(0x0b),
                        'e' => bytes.push(0x1b),
                        '0'..='7' => {
                            let mut n = e.to_digit(8).unwrap_or(0);
                            for _ in 0..2 {
                                match self.peek().and_then(|d| d.to_digit(8)) {
                                    Some(d) => {
                                        n = n * 8 + d;
                                        self.bump();
                                    }
                                    None => break,
                                }
                            }
                            bytes.push((n & 0xff) as u8);
                        }
                        other => {
                            let mut tmp = [0u8; 4];
                            bytes.extend_from_slice(other.encode_utf8(&mut tmp).as_bytes());
                        }
                    }
                }
                other => {
                    let mut tmp = [0u8; 4];
                    bytes.extend_from_slice(other.encode_utf8(&mut tmp).as_bytes());
                }
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
