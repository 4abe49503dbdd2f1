//! # ductor-policy
//!
//! A TOML-driven, deny-leaning policy gate for the ductor runtime.
//!
//! ## Overview
//!
//! This crate provides [`TomlPolicyGate`], which implements the
//! [`PolicyGate`](ductor_core::traits::PolicyGate) trait. Rules are
//! declared in a TOML file with three lists (block / require-human /
//! allow), exclusion zones, and content guardrails for shell and browser
//! operations. Anything no allow rule covers requires operator sign-off.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use ductor_policy::TomlPolicyGate;
//!
//! let gate = TomlPolicyGate::from_file(Path::new("policies/desktop.toml"))?;
//! // Pass `gate` to `ductor_core::Orchestrator::new(...)`.
//! ```

pub mod gate;
pub mod rule;

pub use gate::TomlPolicyGate;
pub use rule::{BrowserGuardrail, ExclusionZone, PolicyConfig, PolicyRule, ShellGuardrail};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use ductor_contracts::{
        action::{Action, ClickTarget},
        error::DuctorError,
        gate::{GateContext, GateVerdict},
        target::Rect,
    };
    use ductor_core::traits::PolicyGate;
    use serde_json::json;

    use crate::TomlPolicyGate;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn click_at(x: i32, y: i32) -> Action {
        Action::Click { target: ClickTarget::Coordinate { x, y } }
    }

    fn shell(command: &str, args: &[&str]) -> Action {
        Action::ShellOp {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn no_ctx() -> GateContext {
        GateContext::default()
    }

    /// A permissive baseline policy used by most tests: clicks, typing,
    /// and shell ops are allowed at the kind level.
    const BASE_POLICY: &str = r#"
        [[allow]]
        id = "allow-pointer"
        description = "Pointer and keyboard interaction is fine"
        kinds = ["click", "type", "key", "scroll"]

        [[allow]]
        id = "allow-shell"
        description = "Shell ops are kind-allowed; the guardrail vets content"
        kinds = ["shell_op"]

        [shell_guardrail]
        allowed_commands = ["ls", "echo", "grep", "wc", "git"]
        destructive_patterns = ["rm -rf", "format "]
    "#;

    // ── 1. default requires a human ───────────────────────────────────────────

    /// An action kind no allow rule covers requires operator sign-off.
    #[test]
    fn test_default_requires_human() {
        let gate = TomlPolicyGate::from_toml_str(BASE_POLICY).unwrap();
        let action = Action::RunSkill { name: "archive-mail".to_string(), args: json!({}) };

        match gate.evaluate(&action, &no_ctx()).unwrap() {
            GateVerdict::RequireHuman { reason } => {
                assert!(reason.contains("run_skill"), "reason was: {reason}");
            }
            other => panic!("expected RequireHuman, got {:?}", other),
        }
    }

    // ── 2. explicit allow ─────────────────────────────────────────────────────

    #[test]
    fn test_explicit_allow() {
        let gate = TomlPolicyGate::from_toml_str(BASE_POLICY).unwrap();
        let verdict = gate.evaluate(&click_at(50, 50), &no_ctx()).unwrap();
        assert_eq!(verdict, GateVerdict::Allow);
    }

    // ── 3. explicit block wins over allow ─────────────────────────────────────

    /// Block rules are evaluated before allow rules: an action matching
    /// both is blocked.
    #[test]
    fn test_block_beats_allow() {
        let toml = format!(
            r#"
            [[block]]
            id = "no-typing-secrets"
            description = "Never type passwords"
            kinds = ["type"]
            text_contains = "password"
            reason = "typing credential-like text is prohibited"
            {BASE_POLICY}
            "#
        );
        let gate = TomlPolicyGate::from_toml_str(&toml).unwrap();

        let typed = Action::Type { text: "my password is hunter2".to_string() };
        match gate.evaluate(&typed, &no_ctx()).unwrap() {
            GateVerdict::Block { reason } => {
                assert!(reason.contains("credential-like"));
            }
            other => panic!("expected Block, got {:?}", other),
        }

        // Text without the matcher substring falls through to the allow.
        let benign = Action::Type { text: "hello world".to_string() };
        assert_eq!(gate.evaluate(&benign, &no_ctx()).unwrap(), GateVerdict::Allow);
    }

    // ── 4. exclusion zones win over allow ─────────────────────────────────────

    /// Spec precedence: for an action matching both an allow rule and an
    /// exclusion zone, the zone wins.
    #[test]
    fn test_exclusion_zone_beats_allow() {
        let toml = format!(
            r#"
            [[exclusion_zones]]
            x = 0
            y = 0
            w = 100
            h = 30
            label = "system menu bar"
            {BASE_POLICY}
            "#
        );
        let gate = TomlPolicyGate::from_toml_str(&toml).unwrap();

        // A coordinate click inside the zone is blocked even though clicks
        // are allowed and no rule names this action.
        match gate.evaluate(&click_at(50, 10), &no_ctx()).unwrap() {
            GateVerdict::Block { reason } => {
                assert!(reason.contains("system menu bar"), "reason was: {reason}");
            }
            other => panic!("expected Block, got {:?}", other),
        }

        // Outside the zone the click is allowed.
        assert_eq!(gate.evaluate(&click_at(50, 200), &no_ctx()).unwrap(), GateVerdict::Allow);

        // Mark-addressed actions are checked through their resolved bounds.
        let ctx = GateContext { target_bounds: Some(Rect::new(90, 20, 40, 40)) };
        match gate.evaluate(&click_at(500, 500), &ctx).unwrap() {
            GateVerdict::Block { reason } => {
                assert!(reason.contains("system menu bar"));
            }
            other => panic!("expected Block via target bounds, got {:?}", other),
        }
    }

    // ── 5. shell guardrail ────────────────────────────────────────────────────

    /// The shell guardrail runs even though shell_op is kind-allowed.
    #[test]
    fn test_shell_guardrail() {
        let gate = TomlPolicyGate::from_toml_str(BASE_POLICY).unwrap();

        // Allowlisted, non-destructive command passes.
        assert_eq!(
            gate.evaluate(&shell("git", &["status"]), &no_ctx()).unwrap(),
            GateVerdict::Allow
        );

        // Basename matching survives absolute paths.
        assert_eq!(
            gate.evaluate(&shell("/usr/bin/grep", &["-r", "todo"]), &no_ctx()).unwrap(),
            GateVerdict::Allow
        );

        // Non-allowlisted command is blocked despite the kind-level allow.
        match gate.evaluate(&shell("curl", &["http://example.com"]), &no_ctx()).unwrap() {
            GateVerdict::Block { reason } => assert!(reason.contains("curl")),
            other => panic!("expected Block, got {:?}", other),
        }

        // Destructive pattern in an allowlisted command escalates.
        match gate.evaluate(&shell("git", &["clean;", "rm", "-rf", "/"]), &no_ctx()).unwrap() {
            GateVerdict::RequireHuman { reason } => assert!(reason.contains("rm -rf")),
            other => panic!("expected RequireHuman, got {:?}", other),
        }
    }

    // ── 6. browser guardrail ──────────────────────────────────────────────────

    #[test]
    fn test_browser_guardrail() {
        let toml = r#"
            [[allow]]
            id = "allow-browser"
            description = "Browser ops are kind-allowed"
            kinds = ["browser_op"]

            [browser_guardrail]
            sensitive_domains = ["bank.example"]
            risky_patterns = ["document.cookie", "fetch("]
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();

        // Script execution on a sensitive domain (or subdomain) is blocked.
        let on_bank = Action::BrowserOp {
            kind: "run_javascript".to_string(),
            args: json!({ "url": "https://login.bank.example/home", "script": "1+1" }),
        };
        match gate.evaluate(&on_bank, &no_ctx()).unwrap() {
            GateVerdict::Block { reason } => assert!(reason.contains("login.bank.example")),
            other => panic!("expected Block, got {:?}", other),
        }

        // A risky payload elsewhere escalates to the operator.
        let cookie_theft = Action::BrowserOp {
            kind: "run_javascript".to_string(),
            args: json!({ "url": "https://blog.example", "script": "document.cookie" }),
        };
        match gate.evaluate(&cookie_theft, &no_ctx()).unwrap() {
            GateVerdict::RequireHuman { reason } => assert!(reason.contains("document.cookie")),
            other => panic!("expected RequireHuman, got {:?}", other),
        }

        // A benign navigation passes through to the allow rule.
        let navigate = Action::BrowserOp {
            kind: "navigate".to_string(),
            args: json!({ "url": "https://blog.example" }),
        };
        assert_eq!(gate.evaluate(&navigate, &no_ctx()).unwrap(), GateVerdict::Allow);
    }

    // ── 7. explicit require-human rules ───────────────────────────────────────

    #[test]
    fn test_require_human_rule_overrides_allow() {
        let toml = format!(
            r#"
            [[require_human]]
            id = "confirm-key-combos"
            description = "Global shortcuts need a human"
            kinds = ["key"]
            text_contains = "cmd"
            reason = "global shortcuts require confirmation"
            {BASE_POLICY}
            "#
        );
        let gate = TomlPolicyGate::from_toml_str(&toml).unwrap();

        let combo = Action::Key { combo: vec!["cmd".to_string(), "q".to_string()] };
        match gate.evaluate(&combo, &no_ctx()).unwrap() {
            GateVerdict::RequireHuman { reason } => {
                assert!(reason.contains("confirmation"));
            }
            other => panic!("expected RequireHuman, got {:?}", other),
        }

        // A plain key press is still allowed.
        let enter = Action::Key { combo: vec!["enter".to_string()] };
        assert_eq!(gate.evaluate(&enter, &no_ctx()).unwrap(), GateVerdict::Allow);
    }

    // ── 8. TOML parse error ───────────────────────────────────────────────────

    #[test]
    fn test_toml_parse_error() {
        let result = TomlPolicyGate::from_toml_str("this is not valid toml ][[[");
        match result {
            Err(DuctorError::ConfigError { reason }) => {
                assert!(reason.contains("failed to parse policy TOML"));
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    // ── 9. wildcard kind ──────────────────────────────────────────────────────

    #[test]
    fn test_wildcard_block() {
        let toml = r#"
            [[block]]
            id = "lockdown"
            description = "Everything is blocked"
            kinds = ["*"]
            reason = "lockdown mode"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();

        for action in [
            click_at(1, 1),
            Action::Type { text: "hi".to_string() },
            shell("ls", &[]),
        ] {
            match gate.evaluate(&action, &no_ctx()).unwrap() {
                GateVerdict::Block { reason } => assert!(reason.contains("lockdown")),
                other => panic!("expected Block for {}, got {:?}", action.kind(), other),
            }
        }
    }
}
