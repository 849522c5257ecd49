//! Mock GDB/MI debugger binary for integration testing
//!
//! Speaks enough MI over stdin/stdout to run the adapter end to end
//! without a real debugger. See `mi_debugger::testing::mock` for the
//! behaviour switches it accepts on its command line.

use std::io::{BufRead, BufReader, Write};

use mi_debugger::testing::{MockAction, MockGdb, MockOptions};

fn main() {
    let options = MockOptions::from_args(std::env::args().skip(1));
    let mut mock = MockGdb::new(options);

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    if send(&mut writer, &mock.banner()).is_err() {
        return;
    }

    for line in reader.lines() {
        let Ok(line) = line else {
            break;
        };
        let response = mock.handle_line(&line);
        if send(&mut writer, &response.lines).is_err() {
            break;
        }
        match response.action {
            MockAction::Continue => {}
            MockAction::Exit => return,
            // Dies on SIGABRT, like a debugger hitting an internal error
            MockAction::Crash => std::process::abort(),
        }
    }
}

fn send<W: Write>(writer: &mut W, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}
