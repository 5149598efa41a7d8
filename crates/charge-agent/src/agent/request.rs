//! Per-transaction state: the five sub-trees and the field-template walk.

use super::dp::DataProvider;
use super::{
    AgentError, ERROR_FIELD, META_CGREP, META_CGREQ, META_OPTS, META_REP, META_REQ, META_VARS,
    REMOTE_HOST,
};
use crate::config::FieldTemplateCfg;
use crate::filters;
use crate::nav::{parse_path, NavMap, NavValue};
use crate::rsr::{self, parse_rules};
use std::collections::HashMap;
use std::sync::Arc;

/// Named template sets referenced by `*template` fields.
pub type TemplateRegistry = HashMap<String, Vec<FieldTemplateCfg>>;

/// Mutable per-packet state threaded through the processor pipeline.
///
/// `*req` is the read-only inbound view; `*vars`, `*cgrep`, `*rep` and
/// `*opts` accumulate across processors, while `*cgreq` is rebuilt per
/// processor.
pub struct AgentRequest {
    pub req: Arc<dyn DataProvider>,
    pub vars: NavMap,
    pub cgr_request: NavMap,
    pub cgr_reply: NavMap,
    pub reply: NavMap,
    pub opts: NavMap,
    pub tenant: String,
    pub timezone: String,
}

impl AgentRequest {
    pub fn new(
        req: Arc<dyn DataProvider>,
        remote_host: Option<String>,
        tenant: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        let mut vars = NavMap::new();
        if let Some(host) = remote_host {
            vars.set(&parse_path(REMOTE_HOST), NavValue::Text(host));
        }
        AgentRequest {
            req,
            vars,
            cgr_request: NavMap::new(),
            cgr_reply: NavMap::new(),
            reply: NavMap::new(),
            opts: NavMap::new(),
            tenant: tenant.into(),
            timezone: timezone.into(),
        }
    }

    /// Resolve a fully-prefixed path (`*req.User-Name`, `*cgrep.MaxUsage`).
    pub fn field_as_string(&self, path: &str) -> Option<String> {
        let (prefix, rest) = path.split_once('.')?;
        let items = parse_path(rest);
        match prefix {
            META_REQ => self.req.field_as_string(&items),
            META_VARS => self.vars.field_as_string(&items),
            META_CGREQ => self.cgr_request.field_as_string(&items),
            META_CGREP => self.cgr_reply.field_as_string(&items),
            META_REP => self.reply.field_as_string(&items),
            META_OPTS => self.opts.field_as_string(&items),
            _ => None,
        }
    }

    /// Write to a fully-prefixed path. `*req` is read-only.
    pub fn set(&mut self, path: &str, value: NavValue) -> Result<(), AgentError> {
        let (prefix, rest) = path
            .split_once('.')
            .ok_or_else(|| AgentError::UnknownPathPrefix(path.to_string()))?;
        let items = parse_path(rest);
        let tree = match prefix {
            META_REQ => return Err(AgentError::ReadOnlySubtree(META_REQ.to_string())),
            META_VARS => &mut self.vars,
            META_CGREQ => &mut self.cgr_request,
            META_CGREP => &mut self.cgr_reply,
            META_REP => &mut self.reply,
            META_OPTS => &mut self.opts,
            other => return Err(AgentError::UnknownPathPrefix(other.to_string())),
        };
        tree.set(&items, value);
        Ok(())
    }

    /// Record an RPC outcome: merge the reply body into `*cgrep` and set the
    /// `Error` field (empty on success).
    pub fn set_cgr_reply(&mut self, reply: Option<&serde_json::Value>, error: Option<String>) {
        if let Some(body) = reply {
            self.cgr_reply.merge_json(&[], body);
        }
        self.cgr_reply.set(
            &parse_path(ERROR_FIELD),
            NavValue::Text(error.unwrap_or_default()),
        );
    }

    /// Evaluate an ordered template list. Non-mandatory templates with an
    /// empty source are skipped; a mandatory one aborts; an evaluated blocker
    /// truncates the remainder of the list.
    pub fn set_fields(
        &mut self,
        templates: &[FieldTemplateCfg],
        registry: &TemplateRegistry,
    ) -> Result<(), AgentError> {
        for template in templates {
            {
                let lookup = |path: &str| self.field_as_string(path);
                if !filters::pass_all(&template.filters, &lookup)? {
                    continue;
                }
            }
            if template.field_type == "*template" {
                let expansion = registry
                    .get(template.value.as_str())
                    .ok_or_else(|| AgentError::UnknownTemplate(template.value.clone()))?;
                self.set_fields(expansion, registry)?;
                continue;
            }
            let value = self.evaluate_template(template)?;
            let value = match value {
                Some(v) if !v.is_empty() => v,
                _ => {
                    if template.mandatory {
                        return Err(AgentError::MandatoryMissing(template.label()));
                    }
                    continue;
                }
            };
            self.write_field(template, value)?;
            if template.blocker {
                break;
            }
        }
        Ok(())
    }

    fn evaluate_template(
        &self,
        template: &FieldTemplateCfg,
    ) -> Result<Option<NavValue>, AgentError> {
        let lookup = |path: &str| self.field_as_string(path);
        match template.field_type.as_str() {
            "*constant" | "*variable" | "*composed" => {
                let mut out = String::new();
                for rule in parse_rules(&template.value)? {
                    if let Some(part) = rule.evaluate(&lookup)? {
                        out.push_str(&part);
                    }
                }
                Ok(Some(NavValue::Text(out)))
            }
            "*usage_difference" => {
                let rules = parse_rules(&template.value)?;
                if rules.len() != 2 {
                    return Err(AgentError::UsageDifferenceArity(rules.len()));
                }
                let mut stamps = Vec::with_capacity(2);
                for rule in &rules {
                    match rule.evaluate(&lookup)? {
                        Some(raw) if !raw.is_empty() => stamps.push(rsr::parse_time(&raw)?),
                        _ => return Ok(None),
                    }
                }
                let delta = (stamps[0] - stamps[1]).abs();
                let nanos = delta.num_nanoseconds().unwrap_or(i64::MAX).unsigned_abs();
                Ok(Some(NavValue::Duration(std::time::Duration::from_nanos(
                    nanos,
                ))))
            }
            other => Err(AgentError::UnsupportedFieldType(other.to_string())),
        }
    }

    fn write_field(
        &mut self,
        template: &FieldTemplateCfg,
        value: NavValue,
    ) -> Result<(), AgentError> {
        if template.field_type == "*composed" {
            let existing = self.field_as_string(&template.path).unwrap_or_default();
            return self.set(&template.path, NavValue::Text(existing + &value.to_string()));
        }
        self.set(&template.path, value)
    }

    /// Evaluate the processor's tenant rules, falling back to the default.
    pub fn resolve_tenant(
        &self,
        tenant_rules: Option<&str>,
        default_tenant: &str,
    ) -> Result<String, AgentError> {
        let Some(rules) = tenant_rules.filter(|r| !r.is_empty()) else {
            return Ok(default_tenant.to_string());
        };
        let lookup = |path: &str| self.field_as_string(path);
        let mut out = String::new();
        for rule in parse_rules(rules)? {
            if let Some(part) = rule.evaluate(&lookup)? {
                out.push_str(&part);
            }
        }
        if out.is_empty() {
            out = default_tenant.to_string();
        }
        Ok(out)
    }
}
