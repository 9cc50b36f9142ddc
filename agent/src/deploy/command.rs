//! Composition of the `ansible-playbook` invocation

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::DeployError;

/// Everything that goes into one command line
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec<'a> {
    pub program: &'a str,
    pub inventory: &'a Path,
    pub playbook: &'a Path,
    pub extra_vars: Option<&'a BTreeMap<String, serde_json::Value>>,
    pub env: Option<&'a BTreeMap<String, String>>,
}

/// The command handed to the shell, plus the form recorded for audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    pub command: String,
    /// Same as `command` with environment values masked
    pub display: String,
}

/// Quote `value` as a single POSIX shell word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn is_shell_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+=:,@%".contains(&b))
}

/// Quote `value` unless it is made only of characters the shell leaves alone
pub fn quote_if_needed(value: &str) -> String {
    if is_shell_safe(value) {
        value.to_string()
    } else {
        shell_quote(value)
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build the command line.
///
/// Environment assignments come first, then the base command, then the
/// extra variables as one JSON document in a single quoted argument. Maps are
/// ordered so identical inputs give identical output.
pub fn build_command(spec: &CommandSpec<'_>) -> Result<BuiltCommand, DeployError> {
    let mut command = Vec::new();
    let mut display = Vec::new();

    if let Some(env) = spec.env {
        for (name, value) in env {
            if !is_env_name(name) {
                return Err(DeployError::InvalidCommand(format!(
                    "invalid environment variable name {:?}",
                    name
                )));
            }
            command.push(format!("{}={}", name, shell_quote(value)));
            display.push(format!("{}=***", name));
        }
    }

    let base = [
        quote_if_needed(spec.program),
        "-i".to_string(),
        quote_if_needed(&spec.inventory.to_string_lossy()),
        quote_if_needed(&spec.playbook.to_string_lossy()),
    ];
    command.extend(base.iter().cloned());
    display.extend(base);

    if let Some(vars) = spec.extra_vars.filter(|v| !v.is_empty()) {
        let json = serde_json::to_string(vars)?;
        let arg = shell_quote(&json);
        command.push("--extra-vars".to_string());
        command.push(arg.clone());
        display.push("--extra-vars".to_string());
        display.push(arg);
    }

    Ok(BuiltCommand {
        command: command.join(" "),
        display: display.join(" "),
    })
}
