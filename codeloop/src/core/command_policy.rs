//! Allow/deny policy for `exec.run` commands.
//!
//! Commands are never handed to a shell. They are tokenized here and spawned
//! directly, so shell operators outside quotes are refused outright.

use crate::error::AgentError;

/// Operators a shell would interpret. Longer operators come first so `&&` is
/// reported as itself rather than as `&`.
const SHELL_OPERATORS: &[&str] = &["&&", "||", "$(", ";", "|", "`", ">", "<", "&"];

/// Programs that only forward to the command after them.
const WRAPPERS: &[&str] = &["env", "nice", "nohup", "time", "timeout", "command", "exec", "xargs"];

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

const DESTRUCTIVE_GIT: &[&str] = &[
    "push",
    "reset",
    "clean",
    "checkout",
    "rebase",
    "commit",
    "merge",
    "restore",
    "stash",
    "rm",
    "filter-branch",
    "gc",
    "switch",
    "am",
    "cherry-pick",
    "revert",
];

#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allow_prefixes: Vec<Vec<String>>,
}

impl CommandPolicy {
    /// Each prefix is matched token-wise, so `cargo` allows `cargo test` but
    /// not `cargotest`.
    pub fn new<S: AsRef<str>>(allow_prefixes: &[S]) -> Self {
        let allow_prefixes = allow_prefixes
            .iter()
            .filter_map(|prefix| tokenize(prefix.as_ref()).ok())
            .filter(|tokens| !tokens.is_empty())
            .collect();
        Self { allow_prefixes }
    }

    /// Return the argv to spawn, or the reason the command is refused.
    pub fn check(&self, command: &str) -> Result<Vec<String>, AgentError> {
        let refuse = |reason: &str| AgentError::CommandNotAllowed {
            command: command.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(refuse("empty command"));
        }
        if let Some(operator) = unquoted_operator(trimmed) {
            return Err(refuse(&format!("shell operator '{operator}' is not supported")));
        }
        let argv = tokenize(trimmed).map_err(|reason| refuse(&reason))?;
        if let Some(reason) = deny_reason(&argv) {
            return Err(refuse(&reason));
        }
        if self.allow_prefixes.is_empty() {
            return Err(refuse("no command prefixes are allowed"));
        }
        if !self
            .allow_prefixes
            .iter()
            .any(|prefix| argv.starts_with(prefix))
        {
            return Err(refuse("command matches no allowed prefix"));
        }
        Ok(argv)
    }
}

/// Why `argv` is refused whatever the allowlist says. Judged on the program
/// (after wrappers such as `env` or `timeout`) and, for git, its subcommand.
fn deny_reason(argv: &[String]) -> Option<String> {
    let (program, args) = strip_wrappers(argv).split_first()?;
    let program = program_name(program);
    let reason = match program {
        "rm" | "shred" | "unlink" => "file removal",
        "sudo" | "doas" | "su" => "privilege escalation",
        "dd" => "raw disk write",
        "shutdown" | "reboot" | "halt" | "poweroff" => "host power control",
        "chmod" if args.iter().any(|arg| arg == "777") => "permission widening",
        "git" if destructive_git(args) => "destructive version-control operation",
        name if name.starts_with("mkfs") => "filesystem formatting",
        name if SHELLS.contains(&name) => return shell_script(args).and_then(script_deny_reason),
        _ => return None,
    };
    Some(reason.to_string())
}

/// `sh -c` scripts are held to the same rules as the command itself.
fn script_deny_reason(script: &str) -> Option<String> {
    if let Some(operator) = unquoted_operator(script) {
        return Some(format!("shell operator '{operator}' in inline script"));
    }
    match tokenize(script) {
        Ok(argv) => deny_reason(&argv),
        Err(reason) => Some(reason),
    }
}

fn shell_script(args: &[String]) -> Option<&str> {
    let flag = args
        .iter()
        .position(|arg| arg.starts_with('-') && !arg.starts_with("--") && arg.contains('c'))?;
    args.get(flag + 1).map(String::as_str)
}

fn strip_wrappers(argv: &[String]) -> &[String] {
    let mut rest = argv;
    while let Some((first, tail)) = rest.split_first() {
        if !WRAPPERS.contains(&program_name(first)) && !is_assignment(first) {
            break;
        }
        rest = tail;
        while let Some((next, tail)) = rest.split_first()
            && (next.starts_with('-')
                || is_assignment(next)
                || next.starts_with(|ch: char| ch.is_ascii_digit()))
        {
            rest = tail;
        }
    }
    rest
}

fn destructive_git(args: &[String]) -> bool {
    let mut rest = args.iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "-C" | "-c" | "--git-dir" | "--work-tree" => {
                rest.next();
            }
            flag if flag.starts_with('-') => {}
            "branch" => {
                return rest.any(|arg| matches!(arg.as_str(), "-d" | "-D" | "--delete"));
            }
            subcommand => return DESTRUCTIVE_GIT.contains(&subcommand),
        }
    }
    false
}

fn program_name(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

/// `NAME=value` as a leading environment assignment.
fn is_assignment(token: &str) -> bool {
    token.split_once('=').is_some_and(|(name, _)| {
        !name.is_empty()
            && !name.starts_with(|ch: char| ch.is_ascii_digit())
            && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    })
}

/// First shell operator outside single or double quotes.
fn unquoted_operator(command: &str) -> Option<&'static str> {
    let mut quote: Option<char> = None;
    for (index, ch) in command.char_indices() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None => {
                let rest = &command[index..];
                if let Some(operator) = SHELL_OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                    return Some(*operator);
                }
            }
        }
    }
    None
}

/// Split on whitespace, honoring single and double quotes.
pub fn tokenize(command: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;
    for ch in command.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                in_token = true;
            }
            None if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(ch);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
