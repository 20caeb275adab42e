//! Tool-approval decision engine.
//!
//! Pure policy: given the current approval level, a tool name and its
//! input, decide whether the call may execute automatically or must wait
//! for human confirmation. No hidden state beyond the level itself, so
//! decisions are deterministic and testable in isolation.
//!
//! Command safety at `Medium` is pattern-based and ordered: dangerous
//! patterns are checked before safe patterns, so a command matching both
//! lists always requires approval.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::parse_provider_tool_name;

/// Ordinal approval policy (0-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalLevel {
    /// Every call requires approval.
    Off,
    /// Auto-approve read-only tools only.
    #[default]
    Low,
    /// Auto-approve read-only tools, reversible file edits, and
    /// safe-listed commands.
    Medium,
    /// Every call auto-approved.
    High,
}

impl ApprovalLevel {
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_ordinal(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl std::fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one approval decision. Computed per tool call, never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    pub requires_approval: bool,
    pub reason: Option<String>,
}

impl ApprovalDecision {
    fn auto() -> Self {
        Self {
            requires_approval: false,
            reason: None,
        }
    }

    fn gated(reason: impl Into<String>) -> Self {
        Self {
            requires_approval: true,
            reason: Some(reason.into()),
        }
    }
}

/// Tool classification for permission checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// Never modifies state.
    ReadOnly,
    /// File modification staged through a diff; reversible via the diff.
    ReversibleEdit,
    /// Arbitrary command execution.
    Command,
    /// External provider tool (mcp__ namespaced).
    Provider,
    /// Anything else; treated as state-changing.
    Other,
}

/// Classify a tool by name.
pub fn classify_tool(name: &str) -> ToolClass {
    if parse_provider_tool_name(name).is_some() {
        return ToolClass::Provider;
    }
    match name {
        "read" | "list" | "search" | "task_complete" => ToolClass::ReadOnly,
        "write" | "edit" => ToolClass::ReversibleEdit,
        "run_command" => ToolClass::Command,
        _ => ToolClass::Other,
    }
}

/// Ordered dangerous command patterns. First match wins and is reported
/// in the decision reason.
static DANGEROUS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\brm\b", "rm"),
        (r"\bsudo\b", "sudo"),
        (r"\bgit\s+push\b", "git push"),
        (r"\bgit\s+reset\b", "git reset"),
        (r"\bgit\s+clean\b", "git clean"),
        (r"\bchmod\b", "chmod"),
        (r"\bchown\b", "chown"),
        (r"\bdd\b", "dd"),
        (r"\bmkfs\b", "mkfs"),
        (r">\s*/dev/", "write to device"),
        (r"\bcurl\b.*\|\s*(sh|bash)\b", "curl piped to shell"),
        (r"\bwget\b.*\|\s*(sh|bash)\b", "wget piped to shell"),
        (r"\bkill\b|\bpkill\b", "kill"),
        (r"\bshutdown\b|\breboot\b", "shutdown"),
        (r"\beval\b", "eval"),
        (r"--force\b|\s-f\b", "force flag"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("valid regex"), label))
    .collect()
});

/// Ordered safe command patterns, consulted only after the dangerous
/// list found no match.
static SAFE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^git\s+(status|diff|log|branch|show|remote)\b",
        r"^ls\b",
        r"^cat\b",
        r"^head\b",
        r"^tail\b",
        r"^grep\b",
        r"^rg\b",
        r"^find\b",
        r"^wc\b",
        r"^pwd$",
        r"^echo\b",
        r"^which\b",
        r"^env$",
        r"^date\b",
        r"^cargo\s+(check|build|test|fmt|clippy|tree|metadata)\b",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});

/// Decide whether a tool call may execute automatically.
///
/// Pure with respect to `(level, tool_name, input)`.
pub fn decide(level: ApprovalLevel, tool_name: &str, input: &Value) -> ApprovalDecision {
    match level {
        ApprovalLevel::High => ApprovalDecision::auto(),
        ApprovalLevel::Off => {
            ApprovalDecision::gated("all tool calls require approval at this level")
        }
        ApprovalLevel::Low => match classify_tool(tool_name) {
            ToolClass::ReadOnly => ApprovalDecision::auto(),
            _ => ApprovalDecision::gated(format!("'{}' is not read-only", tool_name)),
        },
        ApprovalLevel::Medium => match classify_tool(tool_name) {
            ToolClass::ReadOnly | ToolClass::ReversibleEdit => ApprovalDecision::auto(),
            ToolClass::Command => decide_command(input),
            ToolClass::Provider => {
                ApprovalDecision::gated("external provider tools always require approval")
            }
            ToolClass::Other => ApprovalDecision::gated(format!("unclassified tool '{}'", tool_name)),
        },
    }
}

fn decide_command(input: &Value) -> ApprovalDecision {
    let command = input
        .get("command")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .trim();

    if command.is_empty() {
        return ApprovalDecision::gated("empty command");
    }

    for (pattern, label) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(command) {
            return ApprovalDecision::gated(format!("matches dangerous pattern '{}'", label));
        }
    }

    for pattern in SAFE_PATTERNS.iter() {
        if pattern.is_match(command) {
            return ApprovalDecision::auto();
        }
    }

    ApprovalDecision::gated("unknown safety")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(cmd: &str) -> Value {
        json!({ "command": cmd })
    }

    #[test]
    fn test_high_auto_approves_everything() {
        for name in ["read", "write", "run_command", "mcp__srv__tool", "weird"] {
            let d = decide(ApprovalLevel::High, name, &command("rm -rf /"));
            assert!(!d.requires_approval, "{} should auto-approve", name);
        }
    }

    #[test]
    fn test_off_gates_everything() {
        for name in ["read", "list", "search"] {
            let d = decide(ApprovalLevel::Off, name, &json!({}));
            assert!(d.requires_approval, "{} should require approval", name);
        }
    }

    #[test]
    fn test_low_allows_only_read_only() {
        assert!(!decide(ApprovalLevel::Low, "read", &json!({})).requires_approval);
        assert!(!decide(ApprovalLevel::Low, "search", &json!({})).requires_approval);
        assert!(decide(ApprovalLevel::Low, "write", &json!({})).requires_approval);
        assert!(decide(ApprovalLevel::Low, "run_command", &command("ls")).requires_approval);
    }

    #[test]
    fn test_medium_auto_approves_reversible_edits() {
        assert!(!decide(ApprovalLevel::Medium, "edit", &json!({})).requires_approval);
        assert!(!decide(ApprovalLevel::Medium, "write", &json!({})).requires_approval);
    }

    #[test]
    fn test_medium_safe_command_auto_approves() {
        let d = decide(ApprovalLevel::Medium, "run_command", &command("git status"));
        assert!(!d.requires_approval);
    }

    #[test]
    fn test_medium_dangerous_command_requires_approval() {
        let d = decide(ApprovalLevel::Medium, "run_command", &command("rm -rf /tmp/x"));
        assert!(d.requires_approval);
        assert!(d.reason.unwrap().contains("dangerous"));
    }

    #[test]
    fn test_medium_unknown_command_requires_approval() {
        let d = decide(ApprovalLevel::Medium, "run_command", &command("foo-cli run"));
        assert!(d.requires_approval);
        assert_eq!(d.reason.as_deref(), Some("unknown safety"));
    }

    #[test]
    fn test_dangerous_checked_before_safe() {
        // "git push --force" hits the dangerous list even though the
        // command starts with "git".
        let d = decide(
            ApprovalLevel::Medium,
            "run_command",
            &command("git push --force"),
        );
        assert!(d.requires_approval);
        assert!(d.reason.unwrap().contains("dangerous"));

        // A safe-looking prefix never rescues a dangerous command.
        let d = decide(
            ApprovalLevel::Medium,
            "run_command",
            &command("cat /etc/passwd && rm -rf /"),
        );
        assert!(d.requires_approval);
    }

    #[test]
    fn test_medium_provider_tools_always_gated() {
        let d = decide(ApprovalLevel::Medium, "mcp__github__create_issue", &json!({}));
        assert!(d.requires_approval);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let input = command("cargo test");
        let first = decide(ApprovalLevel::Medium, "run_command", &input);
        for _ in 0..10 {
            assert_eq!(first, decide(ApprovalLevel::Medium, "run_command", &input));
        }
    }

    #[test]
    fn test_ordinal_round_trip() {
        for level in [
            ApprovalLevel::Off,
            ApprovalLevel::Low,
            ApprovalLevel::Medium,
            ApprovalLevel::High,
        ] {
            assert_eq!(ApprovalLevel::from_ordinal(level.as_ordinal()), Some(level));
        }
        assert_eq!(ApprovalLevel::from_ordinal(4), None);
    }
}
