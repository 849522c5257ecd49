//! Stack, thread and variable snapshots decoded from MI values

use serde::Serialize;

use super::types::Value;

/// One entry of a call stack; level 0 is the innermost frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub level: usize,
    pub function: Option<String>,
    pub file: Option<String>,
    /// Absolute source path, when the debugger knows it
    pub fullname: Option<String>,
    pub line: Option<u32>,
    pub address: Option<String>,
}

impl StackFrame {
    /// Decode a `frame={level="0",addr="..",func="..",file="..",line=".."}` tuple
    pub fn from_mi(value: &Value) -> Option<Self> {
        // `*stopped` frames carry no level; they are always the innermost
        let level = value.get_num("level").unwrap_or(0);
        if !matches!(value, Value::Tuple(_)) {
            return None;
        }
        Some(Self {
            level,
            function: value.get_str("func").map(String::from),
            file: value.get_str("file").map(String::from),
            fullname: value.get_str("fullname").map(String::from),
            line: value.get_num("line"),
            address: value.get_str("addr").map(String::from),
        })
    }

    /// `function at file:line`, for display
    pub fn location(&self) -> String {
        let func = self.function.as_deref().unwrap_or("??");
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{} at {}:{}", func, file, line),
            _ => match &self.address {
                Some(addr) => format!("{} ({})", func, addr),
                None => func.to_string(),
            },
        }
    }
}

/// Decode the `stack=[frame={..},..]` list of a `-stack-list-frames` reply,
/// ordered innermost first
pub fn frames_from_mi(stack: &Value) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = stack
        .list_values()
        .into_iter()
        .filter_map(StackFrame::from_mi)
        .collect();
    frames.sort_by_key(|f| f.level);
    frames
}

/// Current value of a local variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum VariableValue {
    Value(String),
    /// No value could be retrieved (not yet assigned, optimized out, ...)
    Uninitialized,
}

impl VariableValue {
    /// Interpret a value printed by the debugger
    pub fn from_printed(printed: Option<&str>) -> Self {
        match printed {
            None => Self::Uninitialized,
            Some(s) if is_unavailable(s) => Self::Uninitialized,
            Some(s) => Self::Value(s.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(s) => Some(s),
            Self::Uninitialized => None,
        }
    }
}

impl std::fmt::Display for VariableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(s) => write!(f, "{}", s),
            Self::Uninitialized => write!(f, "<uninitialized>"),
        }
    }
}

fn is_unavailable(printed: &str) -> bool {
    matches!(
        printed.trim(),
        "<optimized out>" | "<unavailable>" | "<error reading variable>"
    ) || printed.starts_with("<error:")
}

/// A local variable or argument of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalVariable {
    pub name: String,
    /// Declared type, when the debugger reported one
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub value: VariableValue,
    /// Whether the variable is a function argument
    pub is_argument: bool,
}

impl LocalVariable {
    /// Decode one entry of a `-stack-list-variables` reply
    pub fn from_mi(value: &Value) -> Option<Self> {
        let name = value.get_str("name")?.to_string();
        Some(Self {
            name,
            type_name: value.get_str("type").map(String::from),
            value: VariableValue::from_printed(value.get_str("value")),
            is_argument: value.get_str("arg") == Some("1"),
        })
    }

    /// Cut the printed value to at most `limit` characters (0 = unlimited)
    pub fn truncate(&mut self, limit: usize) {
        if limit == 0 {
            return;
        }
        if let VariableValue::Value(text) = &mut self.value {
            if text.chars().count() > limit {
                let mut cut: String = text.chars().take(limit).collect();
                cut.push_str("...");
                *text = cut;
            }
        }
    }
}

/// One thread of the debuggee
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadInfo {
    pub id: u32,
    pub target_id: Option<String>,
    pub name: Option<String>,
    /// `stopped` or `running`
    pub state: Option<String>,
    pub frame: Option<StackFrame>,
    pub current: bool,
}

/// Decode a `-thread-info` reply body
pub fn threads_from_mi(threads: &Value, current: Option<&str>) -> Vec<ThreadInfo> {
    threads
        .list_values()
        .into_iter()
        .filter_map(|t| {
            let id_str = t.get_str("id")?;
            Some(ThreadInfo {
                id: id_str.parse().ok()?,
                target_id: t.get_str("target-id").map(String::from),
                name: t.get_str("name").map(String::from),
                state: t.get_str("state").map(String::from),
                frame: t.get("frame").and_then(StackFrame::from_mi),
                current: current == Some(id_str),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::codec::parse;
    use crate::mi::types::{find, Record};

    fn results(line: &str) -> Vec<(String, Value)> {
        match parse(line).unwrap() {
            Record::Result { results, .. } => results,
            other => panic!("Expected result record, got {:?}", other),
        }
    }

    #[test]
    fn test_frames_sorted_innermost_first() {
        let r = results("^done,stack=[frame={level=\"1\",addr=\"0x2\",func=\"main\"},frame={level=\"0\",addr=\"0x1\",func=\"f\",file=\"a.c\",fullname=\"/src/a.c\",line=\"3\"}]");
        let frames = frames_from_mi(find(&r, "stack").unwrap());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].level, 0);
        assert_eq!(frames[0].location(), "f at a.c:3");
        assert_eq!(frames[1].location(), "main (0x2)");
    }

    #[test]
    fn test_locals_uninitialized_marker() {
        let r = results("^done,variables=[{name=\"x\",type=\"int\",value=\"42\"},{name=\"s\",type=\"struct S\"},{name=\"y\",arg=\"1\",type=\"double\",value=\"<optimized out>\"},{name=\"e\",type=\"char *\",value=\"\\\"\\\"\"}]");
        let vars: Vec<LocalVariable> = find(&r, "variables")
            .unwrap()
            .list_values()
            .into_iter()
            .filter_map(LocalVariable::from_mi)
            .collect();

        assert_eq!(vars[0].value, VariableValue::Value("42".to_string()));
        assert_eq!(vars[1].value, VariableValue::Uninitialized);
        assert!(vars[2].is_argument);
        assert_eq!(vars[2].value, VariableValue::Uninitialized);
        // An empty string literal is a value, not a missing one
        assert_eq!(vars[3].value, VariableValue::Value("\"\"".to_string()));
    }

    #[test]
    fn test_truncate_value() {
        let mut var = LocalVariable {
            name: "buf".to_string(),
            type_name: None,
            value: VariableValue::Value("abcdefgh".to_string()),
            is_argument: false,
        };
        var.truncate(0);
        assert_eq!(var.value.as_str(), Some("abcdefgh"));
        var.truncate(4);
        assert_eq!(var.value.as_str(), Some("abcd..."));
    }

    #[test]
    fn test_threads() {
        let r = results("^done,threads=[{id=\"2\",target-id=\"Thread 0x7f\",state=\"stopped\"},{id=\"1\",target-id=\"process 42\",frame={level=\"0\",func=\"main\"},state=\"stopped\"}],current-thread-id=\"1\"");
        let threads = threads_from_mi(find(&r, "threads").unwrap(), Some("1"));
        assert_eq!(threads.len(), 2);
        assert!(!threads[0].current);
        assert!(threads[1].current);
        assert_eq!(
            threads[1].frame.as_ref().and_then(|f| f.function.as_deref()),
            Some("main")
        );
    }
}
