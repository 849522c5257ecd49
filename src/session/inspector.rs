//! Stack and locals retrieval after a stop
//!
//! Inspection never fails a stop: when the debugger refuses a query the
//! snapshot is simply less complete, and the refusal is logged.

use std::collections::BTreeMap;

use super::{PendingStop, Session};
use crate::events::StopSnapshot;
use crate::mi::{commands, find, find_str, frames, LocalVariable, StackFrame, VariableValue};

/// Call stack of a thread, innermost first
pub async fn fetch_stack(session: &mut Session, thread_id: Option<u32>) -> Vec<StackFrame> {
    match session.request(commands::stack_list_frames(thread_id)).await {
        Ok(results) => find(&results, "stack")
            .map(frames::frames_from_mi)
            .unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, ?thread_id, "Failed to list stack frames");
            Vec::new()
        }
    }
}

/// Locals and arguments of one frame, by name
///
/// Aggregates are listed without a value; they are evaluated one by one
/// and stay uninitialized when that fails.
pub async fn fetch_locals(
    session: &mut Session,
    thread_id: Option<u32>,
    frame: usize,
) -> BTreeMap<String, LocalVariable> {
    let results = match session
        .request(commands::stack_list_variables(thread_id, frame))
        .await
    {
        Ok(results) => results,
        Err(e) => {
            tracing::warn!(error = %e, frame, "Failed to list variables");
            return BTreeMap::new();
        }
    };

    let listed: Vec<(LocalVariable, bool)> = find(&results, "variables")
        .map(|v| v.list_values())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| {
            let has_value = v.get("value").is_some();
            LocalVariable::from_mi(v).map(|local| (local, has_value))
        })
        .collect();

    let limit = session.options().value_char_limit;
    let mut locals = BTreeMap::new();
    for (mut local, has_value) in listed {
        // Shadowed names: the innermost declaration is listed first
        if locals.contains_key(&local.name) {
            continue;
        }
        if !has_value {
            local.value = evaluate_value(session, &local.name, thread_id, frame).await;
        }
        local.truncate(limit);
        locals.insert(local.name.clone(), local);
    }
    locals
}

async fn evaluate_value(
    session: &mut Session,
    name: &str,
    thread_id: Option<u32>,
    frame: usize,
) -> VariableValue {
    let command = commands::data_evaluate_expression(name, thread_id, Some(frame));
    match session.request(command).await {
        Ok(results) => VariableValue::from_printed(find_str(&results, "value")),
        Err(e) => {
            tracing::debug!(error = %e, variable = name, "Variable has no value");
            VariableValue::Uninitialized
        }
    }
}

/// Build the snapshot shown for a stop
pub(crate) async fn inspect(session: &mut Session, stop: PendingStop) -> StopSnapshot {
    let mut frames = fetch_stack(session, stop.thread_id).await;
    if frames.is_empty() {
        frames.extend(stop.frame);
    }
    let locals = if frames.is_empty() {
        BTreeMap::new()
    } else {
        fetch_locals(session, stop.thread_id, 0).await
    };

    tracing::debug!(
        reason = %stop.reason,
        frames = frames.len(),
        locals = locals.len(),
        "Stop inspected"
    );
    StopSnapshot {
        reason: stop.reason,
        thread_id: stop.thread_id,
        breakpoint: None,
        frames,
        locals,
    }
}
