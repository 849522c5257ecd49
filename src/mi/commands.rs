//! Builders for the MI commands the adapter issues
//!
//! Each builder returns an [`MiCommand`]; tokens are attached later by the
//! correlator.

use std::path::Path;

use super::types::{MiCommand, ReplyKind};

/// Infer the reply class an operation produces
pub fn expected_reply_for(operation: &str) -> ReplyKind {
    match operation {
        "exec-run" | "exec-continue" | "exec-next" | "exec-step" | "exec-finish"
        | "exec-next-instruction" | "exec-step-instruction" | "exec-until" | "exec-jump" => {
            ReplyKind::Running
        }
        "target-select" => ReplyKind::Connected,
        "gdb-exit" => ReplyKind::Exit,
        _ => ReplyKind::Done,
    }
}

// === Setup ===

pub fn gdb_set(setting: &str, value: impl ToString) -> MiCommand {
    MiCommand::new("gdb-set").args([setting.to_string(), value.to_string()])
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

pub fn set_confirm(on: bool) -> MiCommand {
    gdb_set("confirm", on_off(on))
}

pub fn set_pagination(on: bool) -> MiCommand {
    gdb_set("pagination", on_off(on))
}

pub fn set_breakpoint_pending(on: bool) -> MiCommand {
    gdb_set("breakpoint", "pending").arg(on_off(on))
}

pub fn set_print_object(on: bool) -> MiCommand {
    gdb_set("print", "object").arg(on_off(on))
}

pub fn set_width(width: u32) -> MiCommand {
    gdb_set("width", width)
}

pub fn set_height(height: u32) -> MiCommand {
    gdb_set("height", height)
}

/// Limit of array/string elements printed; 0 means unlimited
pub fn set_print_elements(elements: usize) -> MiCommand {
    gdb_set("print", "elements").arg(elements.to_string())
}

/// The commands sent before a session is considered ready
pub fn setup_sequence(print_elements: usize) -> Vec<MiCommand> {
    vec![
        set_confirm(false),
        set_pagination(false),
        set_breakpoint_pending(true),
        set_print_object(true),
        set_width(0),
        set_height(0),
        set_print_elements(print_elements),
    ]
}

// === Target ===

pub fn file_exec_and_symbols(program: &Path) -> MiCommand {
    MiCommand::new("file-exec-and-symbols").arg(program.to_string_lossy())
}

pub fn exec_arguments(args: &[String]) -> MiCommand {
    MiCommand::new("exec-arguments").args(args.iter().cloned())
}

pub fn environment_cd(dir: &Path) -> MiCommand {
    MiCommand::new("environment-cd").arg(dir.to_string_lossy())
}

pub fn target_attach(pid: u32) -> MiCommand {
    MiCommand::new("target-attach").arg(pid.to_string())
}

pub fn target_detach() -> MiCommand {
    MiCommand::new("target-detach")
}

pub fn gdb_exit() -> MiCommand {
    MiCommand::new("gdb-exit")
}

// === Breakpoints ===

/// Insert a breakpoint; `-f` keeps it pending when the location is not yet loaded
pub fn break_insert(
    location: &str,
    disabled: bool,
    condition: Option<&str>,
    ignore_count: u32,
) -> MiCommand {
    let mut cmd = MiCommand::new("break-insert");
    if disabled {
        cmd = cmd.arg("-d");
    }
    if let Some(cond) = condition.filter(|c| !c.is_empty()) {
        cmd = cmd.args(["-c", cond]);
    }
    if ignore_count > 0 {
        cmd = cmd.args(["-i".to_string(), ignore_count.to_string()]);
    }
    cmd.args(["-f", location])
}

pub fn break_delete(numbers: &[u32]) -> MiCommand {
    MiCommand::new("break-delete").args(numbers.iter().map(u32::to_string))
}

pub fn break_enable(numbers: &[u32]) -> MiCommand {
    MiCommand::new("break-enable").args(numbers.iter().map(u32::to_string))
}

pub fn break_disable(numbers: &[u32]) -> MiCommand {
    MiCommand::new("break-disable").args(numbers.iter().map(u32::to_string))
}

pub fn break_after(number: u32, count: u32) -> MiCommand {
    MiCommand::new("break-after").args([number.to_string(), count.to_string()])
}

/// Set or, with an empty condition, clear a breakpoint condition
pub fn break_condition(number: u32, condition: Option<&str>) -> MiCommand {
    let cmd = MiCommand::new("break-condition").arg(number.to_string());
    match condition.filter(|c| !c.is_empty()) {
        Some(cond) => cmd.arg(cond),
        None => cmd,
    }
}

// === Execution ===

pub fn exec_run() -> MiCommand {
    MiCommand::new("exec-run")
}

pub fn exec_continue() -> MiCommand {
    MiCommand::new("exec-continue")
}

pub fn exec_next() -> MiCommand {
    MiCommand::new("exec-next")
}

pub fn exec_step() -> MiCommand {
    MiCommand::new("exec-step")
}

pub fn exec_finish() -> MiCommand {
    MiCommand::new("exec-finish")
}

pub fn exec_interrupt() -> MiCommand {
    MiCommand::new("exec-interrupt")
}

// === Threads & stack ===

pub fn thread_info() -> MiCommand {
    MiCommand::new("thread-info")
}

pub fn thread_select(thread_id: u32) -> MiCommand {
    MiCommand::new("thread-select").arg(thread_id.to_string())
}

pub fn stack_list_frames(thread_id: Option<u32>) -> MiCommand {
    let cmd = MiCommand::new("stack-list-frames");
    match thread_id {
        Some(id) => cmd.args(["--thread".to_string(), id.to_string()]),
        None => cmd,
    }
}

pub fn stack_select_frame(level: usize) -> MiCommand {
    MiCommand::new("stack-select-frame").arg(level.to_string())
}

pub fn stack_list_variables(thread_id: Option<u32>, frame: usize) -> MiCommand {
    let mut cmd = MiCommand::new("stack-list-variables");
    if let Some(id) = thread_id {
        cmd = cmd.args(["--thread".to_string(), id.to_string()]);
    }
    cmd.args(["--frame".to_string(), frame.to_string(), "--simple-values".to_string()])
}

// === Data ===

pub fn data_evaluate_expression(
    expression: &str,
    thread_id: Option<u32>,
    frame: Option<usize>,
) -> MiCommand {
    let mut cmd = MiCommand::new("data-evaluate-expression");
    if let Some(id) = thread_id {
        cmd = cmd.args(["--thread".to_string(), id.to_string()]);
    }
    if let Some(level) = frame {
        cmd = cmd.args(["--frame".to_string(), level.to_string()]);
    }
    cmd.arg(expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::codec::encode;

    #[test]
    fn test_expected_replies() {
        assert_eq!(exec_continue().expected, ReplyKind::Running);
        assert_eq!(exec_interrupt().expected, ReplyKind::Done);
        assert_eq!(gdb_exit().expected, ReplyKind::Exit);
        assert_eq!(break_delete(&[1]).expected, ReplyKind::Done);
    }

    #[test]
    fn test_break_insert_options() {
        let cmd = break_insert("Model.mo:42", true, Some("x > 1"), 3);
        assert_eq!(
            encode(1, &cmd),
            "1-break-insert -d -c \"x > 1\" -i 3 -f Model.mo:42\n"
        );

        let cmd = break_insert("Model.mo:42", false, Some(""), 0);
        assert_eq!(encode(2, &cmd), "2-break-insert -f Model.mo:42\n");
    }

    #[test]
    fn test_break_condition_clear() {
        assert_eq!(encode(5, &break_condition(2, None)), "5-break-condition 2\n");
        assert_eq!(
            encode(6, &break_condition(2, Some("i==3"))),
            "6-break-condition 2 i==3\n"
        );
    }

    #[test]
    fn test_setup_sequence() {
        let lines: Vec<String> = setup_sequence(0)
            .iter()
            .enumerate()
            .map(|(i, c)| encode(i as u64, c))
            .collect();
        assert_eq!(lines[0], "0-gdb-set confirm off\n");
        assert_eq!(lines[2], "2-gdb-set breakpoint pending on\n");
        assert_eq!(lines[6], "6-gdb-set print elements 0\n");
    }

    #[test]
    fn test_stack_list_variables() {
        assert_eq!(
            encode(9, &stack_list_variables(Some(1), 2)),
            "9-stack-list-variables --thread 1 --frame 2 --simple-values\n"
        );
    }
}
