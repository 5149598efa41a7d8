//! Filter expressions.
//!
//! A filter is `op:target:value`, e.g. `*string:~*req.Account:1001;1002`.
//! The value list of a single filter is ORed; the filters of a processor (or
//! of a field template) are ANDed. `~`-prefixed targets and values resolve
//! through the agent request.

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("invalid filter expression <{0}>")]
    InvalidExpression(String),
    #[error("unknown filter operator <{0}>")]
    UnknownOperator(String),
    #[error("filter <{filter}> needs a numeric operand, got <{value}>")]
    NotANumber { filter: String, value: String },
    #[error("invalid regex <{value}> in filter: {source}")]
    InvalidRegex {
        value: String,
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    String,
    Prefix,
    NotPrefix,
    Suffix,
    Exists,
    NotExists,
    Empty,
    NotEmpty,
    Eq,
    Gte,
    Lte,
    Gt,
    Lt,
    Rsr,
}

impl FilterOp {
    fn parse(token: &str) -> Result<Self, FilterError> {
        match token {
            "*string" => Ok(FilterOp::String),
            "*prefix" => Ok(FilterOp::Prefix),
            "*notprefix" => Ok(FilterOp::NotPrefix),
            "*suffix" => Ok(FilterOp::Suffix),
            "*exists" => Ok(FilterOp::Exists),
            "*notexists" => Ok(FilterOp::NotExists),
            "*empty" => Ok(FilterOp::Empty),
            "*notempty" => Ok(FilterOp::NotEmpty),
            "*eq" => Ok(FilterOp::Eq),
            "*gte" => Ok(FilterOp::Gte),
            "*lte" => Ok(FilterOp::Lte),
            "*gt" => Ok(FilterOp::Gt),
            "*lt" => Ok(FilterOp::Lt),
            "*rsr" => Ok(FilterOp::Rsr),
            _ => Err(FilterError::UnknownOperator(token.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterRule {
    pub op: FilterOp,
    pub target: String,
    pub values: Vec<String>,
}

impl FilterRule {
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let (op_token, rest) = expression
            .split_once(':')
            .ok_or_else(|| FilterError::InvalidExpression(expression.to_string()))?;
        let op = FilterOp::parse(op_token)?;
        let (target, values) = match rest.split_once(':') {
            Some((target, values)) => (target, values),
            None => (rest, ""),
        };
        if target.is_empty() {
            return Err(FilterError::InvalidExpression(expression.to_string()));
        }
        Ok(FilterRule {
            op,
            target: target.to_string(),
            values: values
                .split(';')
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    /// Evaluate against a path resolver. Dynamic (`~`-prefixed) targets and
    /// values are resolved; a missing dynamic target behaves as absent.
    pub fn pass(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<bool, FilterError> {
        let target = resolve(&self.target, lookup);
        match self.op {
            FilterOp::Exists => return Ok(target.is_some()),
            FilterOp::NotExists => return Ok(target.is_none()),
            FilterOp::Empty => return Ok(target.as_deref().unwrap_or("").is_empty()),
            FilterOp::NotEmpty => return Ok(!target.as_deref().unwrap_or("").is_empty()),
            _ => {}
        }
        let Some(target) = target else {
            return Ok(false);
        };
        for raw in &self.values {
            let value = resolve(raw, lookup).unwrap_or_default();
            let matched = match self.op {
                FilterOp::String => target == value,
                FilterOp::Prefix => target.starts_with(&value),
                FilterOp::NotPrefix => !target.starts_with(&value),
                FilterOp::Suffix => target.ends_with(&value),
                FilterOp::Eq => self.compare(&target, &value)? == std::cmp::Ordering::Equal,
                FilterOp::Gte => self.compare(&target, &value)? != std::cmp::Ordering::Less,
                FilterOp::Lte => self.compare(&target, &value)? != std::cmp::Ordering::Greater,
                FilterOp::Gt => self.compare(&target, &value)? == std::cmp::Ordering::Greater,
                FilterOp::Lt => self.compare(&target, &value)? == std::cmp::Ordering::Less,
                FilterOp::Rsr => Regex::new(&value)
                    .map_err(|source| FilterError::InvalidRegex {
                        value: value.clone(),
                        source,
                    })?
                    .is_match(&target),
                FilterOp::Exists | FilterOp::NotExists | FilterOp::Empty | FilterOp::NotEmpty => {
                    unreachable!("handled above")
                }
            };
            if matched {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn compare(&self, left: &str, right: &str) -> Result<std::cmp::Ordering, FilterError> {
        let parse = |value: &str| -> Result<f64, FilterError> {
            value.trim().parse().map_err(|_| FilterError::NotANumber {
                filter: format!("{:?}:{}", self.op, self.target),
                value: value.to_string(),
            })
        };
        let left = parse(left)?;
        let right = parse(right)?;
        Ok(left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal))
    }
}

fn resolve(token: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    match token.strip_prefix('~') {
        Some(path) => lookup(path),
        None => Some(token.to_string()),
    }
}

/// AND over a processor's (or template's) filter list.
pub fn pass_all(
    filters: &[String],
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<bool, FilterError> {
    for expression in filters {
        if !FilterRule::parse(expression)?.pass(lookup)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pass(expression: &str, data: &HashMap<String, String>) -> Result<bool, FilterError> {
        let lookup = |path: &str| data.get(path).cloned();
        FilterRule::parse(expression)?.pass(&lookup)
    }

    #[test]
    fn string_values_are_ored() {
        let data = lookup_map(&[("*req.Account", "1002")]);
        assert!(pass("*string:~*req.Account:1001;1002", &data).unwrap());
        assert!(!pass("*string:~*req.Account:1003", &data).unwrap());
    }

    #[test]
    fn prefix_and_suffix() {
        let data = lookup_map(&[("*req.Destination", "+4971123456")]);
        assert!(pass("*prefix:~*req.Destination:+49", &data).unwrap());
        assert!(!pass("*notprefix:~*req.Destination:+49", &data).unwrap());
        assert!(pass("*suffix:~*req.Destination:456", &data).unwrap());
    }

    #[test]
    fn existence_and_emptiness() {
        let data = lookup_map(&[("*req.A", "x"), ("*req.B", "")]);
        assert!(pass("*exists:~*req.A:", &data).unwrap());
        assert!(pass("*notexists:~*req.C:", &data).unwrap());
        assert!(pass("*empty:~*req.B:", &data).unwrap());
        assert!(pass("*empty:~*req.C:", &data).unwrap());
        assert!(pass("*notempty:~*req.A:", &data).unwrap());
    }

    #[test]
    fn numeric_comparisons() {
        let data = lookup_map(&[("*cgrep.MaxUsage", "-1")]);
        assert!(pass("*eq:~*cgrep.MaxUsage:-1", &data).unwrap());
        assert!(pass("*lt:~*cgrep.MaxUsage:0", &data).unwrap());
        assert!(!pass("*gte:~*cgrep.MaxUsage:0", &data).unwrap());
    }

    #[test]
    fn numeric_comparison_on_text_errors() {
        let data = lookup_map(&[("*req.A", "abc")]);
        assert!(pass("*gt:~*req.A:1", &data).is_err());
    }

    #[test]
    fn regex_operator() {
        let data = lookup_map(&[("*req.User-Name", "1001@sip.test")]);
        assert!(pass(r"*rsr:~*req.User-Name:^\d+@sip", &data).unwrap());
        assert!(!pass(r"*rsr:~*req.User-Name:^abc", &data).unwrap());
    }

    #[test]
    fn missing_dynamic_target_fails_match_ops() {
        let data = lookup_map(&[]);
        assert!(!pass("*string:~*req.Nope:x", &data).unwrap());
    }

    #[test]
    fn filters_are_anded() {
        let data = lookup_map(&[("*req.A", "1"), ("*req.B", "2")]);
        let lookup = |path: &str| data.get(path).cloned();
        assert!(pass_all(
            &["*string:~*req.A:1".into(), "*string:~*req.B:2".into()],
            &lookup
        )
        .unwrap());
        assert!(!pass_all(
            &["*string:~*req.A:1".into(), "*string:~*req.B:9".into()],
            &lookup
        )
        .unwrap());
    }

    #[test]
    fn malformed_expressions() {
        assert!(FilterRule::parse("*bogus:~*req.A:1").is_err());
        assert!(FilterRule::parse("nocolons").is_err());
    }
}
