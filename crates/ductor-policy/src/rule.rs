//! Policy rule types and configuration schema.
//!
//! A `PolicyConfig` is deserialized from TOML. It holds three ordered rule
//! lists (block, allow, require-human), a set of exclusion zones, and the
//! content guardrails for shell and browser operations. Rules are loaded
//! once per process and are immutable during an episode; a reload requires
//! a restart.

use serde::{Deserialize, Serialize};

use ductor_contracts::action::Action;
use ductor_contracts::target::Rect;

/// One pattern rule from a block/allow/require-human list.
///
/// A rule matches when the action's kind appears in `kinds` (or `kinds`
/// contains `"*"`) AND every present matcher matches:
/// - `text_contains` against typed text and key combos
/// - `command_contains` against the full shell command line
/// - `url_contains` against a browser op's `url` argument
///
/// Example in TOML:
/// ```toml
/// [[block]]
/// id = "no-shell-rm"
/// description = "Recursive deletion never runs"
/// kinds = ["shell_op"]
/// command_contains = "rm -rf"
/// reason = "recursive deletion is prohibited"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Stable identifier used in episode records and error messages.
    pub id: String,

    /// Human-readable explanation of what this rule controls.
    pub description: String,

    /// Action kinds this rule applies to. `"*"` matches any kind.
    pub kinds: Vec<String>,

    /// Substring matcher over typed text / key combos.
    pub text_contains: Option<String>,

    /// Substring matcher over the shell command line.
    pub command_contains: Option<String>,

    /// Substring matcher over the browser op URL.
    pub url_contains: Option<String>,

    /// The reason written to the episode record when this rule fires.
    /// Defaults to a message naming the rule.
    pub reason: Option<String>,
}

impl PolicyRule {
    /// True when this rule applies to `action`.
    pub fn matches(&self, action: &Action) -> bool {
        let kind_matches = self
            .kinds
            .iter()
            .any(|k| k == "*" || k == action.kind());
        if !kind_matches {
            return false;
        }

        if let Some(needle) = &self.text_contains {
            if !action_text(action).is_some_and(|t| t.contains(needle.as_str())) {
                return false;
            }
        }
        if let Some(needle) = &self.command_contains {
            if !command_line(action).is_some_and(|c| c.contains(needle.as_str())) {
                return false;
            }
        }
        if let Some(needle) = &self.url_contains {
            if !action_url(action).is_some_and(|u| u.contains(needle.as_str())) {
                return false;
            }
        }
        true
    }

    /// The reason recorded when this rule fires.
    pub fn fire_reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| format!("matched rule '{}'", self.id))
    }
}

/// A rectangular screen region no action may target.
///
/// Any action whose click point or resolved target bounds intersect a zone
/// is blocked regardless of every other rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionZone {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    /// Shown in the block reason, e.g. "system menu bar".
    pub label: String,
}

impl ExclusionZone {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }
}

/// Content guardrail for `shell_op` actions.
///
/// Runs even when the action kind itself is allowed: a command whose
/// basename is not allowlisted is blocked, and a command matching a
/// destructive pattern requires operator sign-off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellGuardrail {
    /// Permitted command basenames. Empty list = nothing is permitted.
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    /// Substring patterns that escalate to require-human.
    #[serde(default)]
    pub destructive_patterns: Vec<String>,
}

/// Content guardrail for `browser_op` actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserGuardrail {
    /// Domains where script execution is blocked outright.
    #[serde(default)]
    pub sensitive_domains: Vec<String>,

    /// Script substrings that escalate to require-human.
    #[serde(default)]
    pub risky_patterns: Vec<String>,
}

/// The top-level structure deserialized from a TOML policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Rules that block outright. Evaluated first.
    #[serde(default)]
    pub block: Vec<PolicyRule>,

    /// Rules that allow without operator involvement.
    #[serde(default)]
    pub allow: Vec<PolicyRule>,

    /// Rules that force operator sign-off.
    #[serde(default)]
    pub require_human: Vec<PolicyRule>,

    #[serde(default)]
    pub exclusion_zones: Vec<ExclusionZone>,

    #[serde(default)]
    pub shell_guardrail: ShellGuardrail,

    #[serde(default)]
    pub browser_guardrail: BrowserGuardrail,
}

// ── Action field extraction ───────────────────────────────────────────────────

/// Text content a `text_contains` matcher sees.
pub(crate) fn action_text(action: &Action) -> Option<String> {
    match action {
        Action::Type { text } => Some(text.clone()),
        Action::Key { combo } => Some(combo.join("+")),
        _ => None,
    }
}

/// The full command line of a shell op.
pub(crate) fn command_line(action: &Action) -> Option<String> {
    match action {
        Action::ShellOp { command, args } => {
            let mut line = command.clone();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            Some(line)
        }
        _ => None,
    }
}

/// The URL of a browser op, when its args carry one.
pub(crate) fn action_url(action: &Action) -> Option<String> {
    match action {
        Action::BrowserOp { args, .. } => args
            .get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}
