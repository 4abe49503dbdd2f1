//! TOML-driven policy gate implementation.
//!
//! `TomlPolicyGate` loads a `PolicyConfig` from a TOML string or file and
//! implements the `PolicyGate` trait from ductor-core.
//!
//! Evaluation precedence (first hit wins):
//!
//! 1. Explicit block rules.
//! 2. Exclusion zones — any action whose click point or resolved target
//!    bounds intersect a zone is blocked regardless of every other rule.
//! 3. Content guardrails for `shell_op` / `browser_op` — these run even
//!    when the kind is covered by an allow rule.
//! 4. Explicit require-human rules.
//! 5. Allow rules.
//! 6. Default: require-human for any kind not explicitly allowed.

use std::path::Path;

use tracing::{debug, warn};

use ductor_contracts::{
    action::{Action, ClickTarget},
    error::{DuctorError, DuctorResult},
    gate::{GateContext, GateVerdict},
};
use ductor_core::traits::PolicyGate;

use crate::rule::{command_line, BrowserGuardrail, PolicyConfig, ShellGuardrail};

/// A `PolicyGate` implementation that reads rules from a TOML document.
///
/// Construct via `from_toml_str` or `from_file`, then pass to the
/// orchestrator.
///
/// ```rust,ignore
/// use ductor_policy::TomlPolicyGate;
///
/// let gate = TomlPolicyGate::from_file(Path::new("policies/desktop.toml"))?;
/// ```
#[derive(Debug)]
pub struct TomlPolicyGate {
    config: PolicyConfig,
}

impl TomlPolicyGate {
    /// Parse `s` as TOML and build a `TomlPolicyGate`.
    ///
    /// Returns `DuctorError::ConfigError` if the TOML is malformed or does
    /// not match the expected `PolicyConfig` schema.
    pub fn from_toml_str(s: &str) -> DuctorResult<Self> {
        let config: PolicyConfig = toml::from_str(s).map_err(|e| DuctorError::ConfigError {
            reason: format!("failed to parse policy TOML: {}", e),
        })?;
        Ok(Self { config })
    }

    /// Read the file at `path` and parse it as TOML policy configuration.
    pub fn from_file(path: &Path) -> DuctorResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| DuctorError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }
}

impl PolicyGate for TomlPolicyGate {
    fn evaluate(&self, action: &Action, ctx: &GateContext) -> DuctorResult<GateVerdict> {
        debug!(kind = action.kind(), "evaluating policy");

        // ── 1. Explicit block rules ──────────────────────────────────────────
        for rule in &self.config.block {
            if rule.matches(action) {
                warn!(rule_id = %rule.id, "block rule matched");
                return Ok(GateVerdict::Block { reason: rule.fire_reason() });
            }
        }

        // ── 2. Exclusion zones ───────────────────────────────────────────────
        if let Some(label) = self.zone_hit(action, ctx) {
            warn!(zone = %label, "action targets an exclusion zone");
            return Ok(GateVerdict::Block {
                reason: format!("target inside exclusion zone '{label}'"),
            });
        }

        // ── 3. Content guardrails ────────────────────────────────────────────
        //
        // shell_op and browser_op carry payloads a kind-level allow cannot
        // vouch for; these checks run regardless of the rule lists.
        match action {
            Action::ShellOp { .. } => {
                if let Some(verdict) = shell_guardrail(&self.config.shell_guardrail, action) {
                    return Ok(verdict);
                }
            }
            Action::BrowserOp { .. } => {
                if let Some(verdict) = browser_guardrail(&self.config.browser_guardrail, action) {
                    return Ok(verdict);
                }
            }
            _ => {}
        }

        // ── 4. Explicit require-human rules ──────────────────────────────────
        for rule in &self.config.require_human {
            if rule.matches(action) {
                debug!(rule_id = %rule.id, "require-human rule matched");
                return Ok(GateVerdict::RequireHuman { reason: rule.fire_reason() });
            }
        }

        // ── 5. Allow rules ───────────────────────────────────────────────────
        for rule in &self.config.allow {
            if rule.matches(action) {
                debug!(rule_id = %rule.id, "allow rule matched");
                return Ok(GateVerdict::Allow);
            }
        }

        // ── 6. Default: nothing allowed this kind ────────────────────────────
        warn!(kind = action.kind(), "no allow rule matched; requiring operator sign-off");
        Ok(GateVerdict::RequireHuman {
            reason: format!("action kind '{}' is not explicitly allowed", action.kind()),
        })
    }
}

impl TomlPolicyGate {
    /// The label of the first zone the action touches, if any.
    fn zone_hit(&self, action: &Action, ctx: &GateContext) -> Option<String> {
        let point = match action {
            Action::Click { target: ClickTarget::Coordinate { x, y } } => Some((*x, *y)),
            _ => None,
        };
        for zone in &self.config.exclusion_zones {
            let bounds = zone.bounds();
            if let Some((x, y)) = point {
                if bounds.contains_point(x, y) {
                    return Some(zone.label.clone());
                }
            }
            if let Some(target) = ctx.target_bounds {
                if bounds.intersects(&target) {
                    return Some(zone.label.clone());
                }
            }
        }
        None
    }
}

// ── Guardrails ────────────────────────────────────────────────────────────────

/// Shell content guardrail: allowlist on the command basename, plus
/// destructive-pattern escalation.
fn shell_guardrail(guardrail: &ShellGuardrail, action: &Action) -> Option<GateVerdict> {
    let Action::ShellOp { command, .. } = action else {
        return None;
    };

    let basename = command
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(command)
        .to_lowercase();
    if basename.is_empty() {
        return Some(GateVerdict::Block { reason: "empty shell command".to_string() });
    }

    let allowed = guardrail
        .allowed_commands
        .iter()
        .any(|c| c.to_lowercase() == basename);
    if !allowed {
        return Some(GateVerdict::Block {
            reason: format!("shell command '{basename}' is not allowlisted"),
        });
    }

    let line = command_line(action).unwrap_or_default().to_lowercase();
    for pattern in &guardrail.destructive_patterns {
        if line.contains(&pattern.to_lowercase()) {
            return Some(GateVerdict::RequireHuman {
                reason: format!("destructive shell pattern '{pattern}'"),
            });
        }
    }

    None
}

/// Browser content guardrail: sensitive-domain script blocking plus
/// risky-payload escalation.
fn browser_guardrail(guardrail: &BrowserGuardrail, action: &Action) -> Option<GateVerdict> {
    let Action::BrowserOp { kind, args } = action else {
        return None;
    };

    let runs_script = kind.contains("script") || kind.contains("javascript") || kind == "eval";
    if runs_script {
        let host = args
            .get("url")
            .and_then(|v| v.as_str())
            .map(hostname)
            .unwrap_or_default();
        for domain in &guardrail.sensitive_domains {
            if host == *domain || host.ends_with(&format!(".{domain}")) {
                return Some(GateVerdict::Block {
                    reason: format!("script execution blocked on sensitive domain '{host}'"),
                });
            }
        }
    }

    let payload = args.to_string().to_lowercase();
    for pattern in &guardrail.risky_patterns {
        if payload.contains(&pattern.to_lowercase()) {
            return Some(GateVerdict::RequireHuman {
                reason: format!("risky browser payload pattern '{pattern}'"),
            });
        }
    }

    None
}

/// Hostname of a URL, without pulling in a URL parser: strips the scheme,
/// credentials, port, and path.
fn hostname(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(rest);
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    host.split(':').next().unwrap_or("").to_lowercase()
}
