use std::path::Path;

use crate::error::ConfigError;

/// Placeholder substituted with the target service name.
pub const SERVICE_PLACEHOLDER: &str = "{service}";

/// Validate a remediation command template.
///
/// Remediations run unattended, so a template must be a plain program plus
/// arguments that acts on exactly one named service and can be repeated
/// without harm. This is a guardrail, not a sandbox.
pub fn validate_remediation_template(label: &str, template: &[String]) -> Result<(), ConfigError> {
    let unsafe_cmd = |reason: String| ConfigError::UnsafeRemediation {
        label: label.to_string(),
        reason,
    };

    let Some(program) = template.first() else {
        return Err(unsafe_cmd("command is empty".into()));
    };
    let prog = program_name(program);

    // Shells are effectively arbitrary code execution.
    let is_shell = matches!(
        prog.as_str(),
        "sh" | "bash" | "zsh" | "fish" | "dash" | "ksh" | "pwsh" | "powershell" | "cmd" | "cmd.exe"
    );
    if is_shell {
        return Err(unsafe_cmd(format!("shell entrypoint '{program}' is not allowed")));
    }

    let hard_deny = [
        "sudo", "doas", "rm", "rmdir", "dd", "mkfs", "shutdown", "reboot", "halt", "poweroff",
        "kill", "killall", "pkill", "chmod", "chown", "mv",
    ];
    if hard_deny.contains(&prog.as_str()) {
        return Err(unsafe_cmd(format!("program '{program}' is blocked by policy")));
    }

    // Verbs that destroy state or stop services are never remediation.
    let destructive = [
        "down", "rm", "rmi", "kill", "prune", "delete", "destroy", "stop", "-v", "--volumes",
        "--rmi",
    ];
    if let Some(arg) = template[1..]
        .iter()
        .find(|a| destructive.contains(&a.to_lowercase().as_str()))
    {
        return Err(unsafe_cmd(format!("argument '{arg}' is destructive")));
    }

    let placeholders = template[1..]
        .iter()
        .filter(|a| a.contains(SERVICE_PLACEHOLDER))
        .count();
    if placeholders != 1 {
        return Err(unsafe_cmd(format!(
            "must name exactly one {SERVICE_PLACEHOLDER} argument, found {placeholders}"
        )));
    }

    Ok(())
}

/// Substitute the service name into a validated template.
pub fn render_template(template: &[String], service: &str) -> Vec<String> {
    template
        .iter()
        .map(|a| a.replace(SERVICE_PLACEHOLDER, service))
        .collect()
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| program.to_lowercase())
}
