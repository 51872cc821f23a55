//! Printing results and failures
//!
//! Results go to stdout; human-readable errors go to stderr. With `--raw`
//! both are a single JSON line on stdout.

use std::path::Path;
use std::process::ExitCode;

use serde_json::{json, Value};

use driver::{Error, ErrorKind, StatusReport};

/// Process exit code for an error kind
pub fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::RemoteExecution => 1,
        ErrorKind::Connection => 2,
        ErrorKind::Timeout => 3,
        ErrorKind::Protocol => 4,
    }
}

/// Render a result for a terminal: strings as-is, everything else as pretty JSON
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "nil".to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

pub fn print_value(value: &Value, raw: bool) {
    if raw {
        println!("{}", value);
    } else {
        println!("{}", format_value(value));
    }
}

/// Print the path of a file the host wrote
pub fn print_path(path: &Path, raw: bool) {
    if raw {
        println!("{}", json!({ "file_path": path }));
    } else {
        println!("{}", path.display());
    }
}

/// Report a classified failure and return its exit code
pub fn print_failure(err: &Error, raw: bool) -> ExitCode {
    let text = failure_text(err, raw);
    if raw {
        println!("{}", text);
    } else {
        eprintln!("{}", text);
    }
    ExitCode::from(exit_code(err.kind()))
}

/// Report a local failure (bad arguments, missing file, config problems)
pub fn print_usage_error(err: &anyhow::Error, raw: bool) -> ExitCode {
    let text = usage_error_text(err, raw);
    if raw {
        println!("{}", text);
    } else {
        eprintln!("{}", text);
    }
    ExitCode::from(1)
}

/// JSON line for `--raw`, otherwise the message with its hints
fn failure_text(err: &Error, raw: bool) -> String {
    if raw {
        return err.to_failure().to_string();
    }
    let mut lines = vec![format!("Error: {}", err)];
    lines.extend(hints(err).into_iter().map(|hint| format!("  {}", hint)));
    lines.join("\n")
}

fn usage_error_text(err: &anyhow::Error, raw: bool) -> String {
    if raw {
        json!({
            "success": false,
            "error": format!("{:#}", err),
            "error_type": "usage",
        })
        .to_string()
    } else {
        format!("Error: {:#}", err)
    }
}

pub fn print_status(report: &StatusReport, raw: bool) -> ExitCode {
    if raw {
        println!("{}", report.to_json());
    } else {
        match report {
            StatusReport::Connected { version, .. } => {
                println!("Connected");
                println!("  Version: {}", version.as_deref().unwrap_or("unknown"));
            }
            StatusReport::Unreachable { kind, message } => {
                println!("Disconnected ({})", kind);
                println!("  {}", message);
                println!("Make sure the host application is running with the Supex runtime.");
            }
            StatusReport::Failed { code, message } => {
                println!("Error [{}]: {}", code, message);
            }
        }
    }

    match report {
        StatusReport::Connected { .. } => ExitCode::SUCCESS,
        StatusReport::Unreachable { kind, .. } => ExitCode::from(exit_code(*kind)),
        StatusReport::Failed { .. } => ExitCode::from(1),
    }
}

/// Extra lines shown under an error message
fn hints(err: &Error) -> Vec<String> {
    match err {
        Error::Remote(remote) => {
            let Some(data) = remote.data.as_ref() else {
                return Vec::new();
            };
            ["file", "line", "hint"]
                .iter()
                .filter_map(|field| {
                    let value = data.get(*field)?;
                    let text = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
                    let mut label = field.to_string();
                    label[..1].make_ascii_uppercase();
                    Some(format!("{}: {}", label, text))
                })
                .collect()
        }
        Error::Connection(_) | Error::Timeout(_) => {
            vec!["Make sure the host application is running with the Supex runtime.".to_string()]
        }
        Error::Protocol(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc::RemoteError;
    use std::time::Duration;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        assert_eq!(exit_code(ErrorKind::RemoteExecution), 1);
        assert_eq!(exit_code(ErrorKind::Connection), 2);
        assert_eq!(exit_code(ErrorKind::Timeout), 3);
        assert_eq!(exit_code(ErrorKind::Protocol), 4);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("hello")), "hello");
        assert_eq!(format_value(&json!(2)), "2");
        assert_eq!(format_value(&Value::Null), "nil");
        assert_eq!(format_value(&json!({"a": 1})), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_remote_hints_from_error_data() {
        let err = Error::Remote(
            RemoteError::new(1, "undefined method")
                .with_data(json!({"file": "/tmp/x.rb", "line": 3, "hint": "check spelling"})),
        );
        assert_eq!(
            hints(&err),
            vec!["File: /tmp/x.rb", "Line: 3", "Hint: check spelling"]
        );
    }

    #[test]
    fn test_raw_failure_is_single_json_line() {
        let err = Error::Remote(RemoteError::new(1, "boom").with_data(json!({"line": 2})));
        let text = failure_text(&err, true);
        assert!(!text.contains('\n'));

        let failure: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(failure["success"], false);
        assert_eq!(failure["error"], "boom");
        assert_eq!(failure["error_type"], "remote");
        assert_eq!(failure["error_code"], 1);

        let failure: Value =
            serde_json::from_str(&failure_text(&Error::timeout(Duration::from_secs(2)), true))
                .unwrap();
        assert_eq!(failure["error_type"], "timeout");
        assert!(failure.get("error_code").is_none());
    }

    #[test]
    fn test_plain_failure_includes_hints() {
        let err = Error::Remote(
            RemoteError::new(1, "undefined local variable")
                .with_data(json!({"file": "/tmp/x.rb", "line": 7})),
        );
        assert_eq!(
            failure_text(&err, false),
            "Error: Remote error [1]: undefined local variable\n  File: /tmp/x.rb\n  Line: 7"
        );

        let text = failure_text(&Error::connection("refused"), false);
        assert!(text.starts_with("Error: Connection error: refused\n  "));
    }

    #[test]
    fn test_usage_error_text() {
        let err = anyhow::anyhow!("File not found: /tmp/missing.rb");
        let failure: Value = serde_json::from_str(&usage_error_text(&err, true)).unwrap();
        assert_eq!(failure["error_type"], "usage");
        assert_eq!(failure["error"], "File not found: /tmp/missing.rb");
        assert_eq!(usage_error_text(&err, false), "Error: File not found: /tmp/missing.rb");
    }

    #[test]
    fn test_transport_hints() {
        assert_eq!(hints(&Error::timeout(Duration::from_secs(1))).len(), 1);
        assert!(hints(&Error::protocol("bad")).is_empty());
        assert!(hints(&Error::Remote(RemoteError::new(1, "boom"))).is_empty());
    }
}
