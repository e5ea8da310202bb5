//! Action-level authorization rules.
//!
//! A policy maps action names (`create_environment`, `deploy_session`, ...)
//! to rules:
//!
//! - `""` or `"@"`: allow
//! - `"!"`: deny
//! - `"role:<name>"`: the caller must hold the role
//! - `"<rule> or <rule>"`: any of the alternatives
//!
//! Actions without a rule fall back to the `default` rule, or are allowed.

use crate::auth::RequestContext;
use crate::error::ApiError;
use anyhow::Context;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Allow,
    Deny,
    Role(String),
    Any(Vec<Rule>),
}

impl FromStr for Rule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        let alternatives: Vec<&str> = s.split(" or ").map(str::trim).collect();
        if alternatives.len() > 1 {
            return Ok(Rule::Any(
                alternatives
                    .into_iter()
                    .map(Rule::from_str)
                    .collect::<anyhow::Result<_>>()?,
            ));
        }

        match s {
            "" | "@" => Ok(Rule::Allow),
            "!" => Ok(Rule::Deny),
            _ => match s.strip_prefix("role:") {
                Some(role) if !role.is_empty() => Ok(Rule::Role(role.to_string())),
                _ => anyhow::bail!("Unsupported policy rule: {:?}", s),
            },
        }
    }
}

impl Rule {
    fn allows(&self, ctx: &RequestContext) -> bool {
        match self {
            Rule::Allow => true,
            Rule::Deny => false,
            Rule::Role(role) => ctx.has_role(role),
            Rule::Any(rules) => rules.iter().any(|r| r.allows(ctx)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Policy {
    rules: HashMap<String, Rule>,
}

impl Policy {
    /// A policy that allows every action
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a JSON object of `action -> rule`
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let raw: HashMap<String, String> =
            serde_json::from_str(json).context("Policy must be a JSON object of strings")?;

        let rules = raw
            .into_iter()
            .map(|(action, rule)| {
                let parsed = rule
                    .parse::<Rule>()
                    .with_context(|| format!("Invalid rule for action {}", action))?;
                Ok((action, parsed))
            })
            .collect::<anyhow::Result<_>>()?;

        Ok(Self { rules })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn with_rule(mut self, action: impl Into<String>, rule: Rule) -> Self {
        self.rules.insert(action.into(), rule);
        self
    }

    /// Check that the caller may perform `action`, optionally on `target`
    pub fn check(
        &self,
        action: &str,
        ctx: &RequestContext,
        target: Option<&Value>,
    ) -> Result<(), ApiError> {
        let rule = self.rules.get(action).or_else(|| self.rules.get("default"));

        let allowed = rule.map_or(true, |r| r.allows(ctx));
        if allowed {
            debug!(action, user = %ctx.user, ?target, "Policy check passed");
            Ok(())
        } else {
            warn!(action, user = %ctx.user, tenant = %ctx.tenant, ?target, "Policy check failed");
            Err(ApiError::Forbidden(format!(
                "Policy doesn't allow {} to be performed",
                action
            )))
        }
    }
}
