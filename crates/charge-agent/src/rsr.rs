//! Value-source rules for field templates.
//!
//! A template value is a `;`-separated list of rules. Each rule is either a
//! literal or a `~`-prefixed path into the agent request, optionally followed
//! by a chain of `:s/pattern/replacement/` substitutions and a trailing
//! `{*converter}` group, e.g.
//! `~*req.Called-Station-Id:s/^\+49(\d+)$/0$1/{*duration_seconds}`.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RsrError {
    #[error("invalid substitution rule in <{0}>")]
    InvalidSubstitution(String),
    #[error("invalid regex in <{rule}>: {source}")]
    InvalidRegex {
        rule: String,
        source: regex::Error,
    },
    #[error("unknown converter <{0}>")]
    UnknownConverter(String),
    #[error("cannot parse <{0}> as duration")]
    InvalidDuration(String),
    #[error("cannot parse <{0}> as time")]
    InvalidTime(String),
    #[error("cannot parse <{0}> as number")]
    InvalidNumber(String),
}

/// Post-substitution value conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Converter {
    DurationSeconds,
    DurationNanoseconds,
    Round(usize),
}

impl Converter {
    pub fn parse(token: &str) -> Result<Self, RsrError> {
        match token {
            "*duration_seconds" => Ok(Converter::DurationSeconds),
            "*duration_nanoseconds" => Ok(Converter::DurationNanoseconds),
            _ => match token.strip_prefix("*round:") {
                Some(decimals) => decimals
                    .parse()
                    .map(Converter::Round)
                    .map_err(|_| RsrError::UnknownConverter(token.to_string())),
                None => Err(RsrError::UnknownConverter(token.to_string())),
            },
        }
    }

    pub fn apply(&self, input: &str) -> Result<String, RsrError> {
        match self {
            Converter::DurationSeconds => Ok(format_seconds(parse_duration_nanos(input)?)),
            Converter::DurationNanoseconds => Ok(parse_duration_nanos(input)?.to_string()),
            Converter::Round(decimals) => {
                let number: f64 = input
                    .trim()
                    .parse()
                    .map_err(|_| RsrError::InvalidNumber(input.to_string()))?;
                let rounded = format!("{number:.decimals$}", decimals = *decimals);
                Ok(trim_decimal(&rounded))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Substitution {
    pub pattern: Regex,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub enum RuleSource {
    /// `~`-prefixed dynamic path, resolved against the agent request.
    Path(String),
    Literal(String),
}

#[derive(Debug, Clone)]
pub struct ValueRule {
    pub source: RuleSource,
    pub substitutions: Vec<Substitution>,
    pub converters: Vec<Converter>,
}

impl ValueRule {
    pub fn parse(raw: &str) -> Result<Self, RsrError> {
        let (body, converters) = split_converters(raw)?;

        let (source_part, subst_part) = match body.find(":s/") {
            Some(idx) => (&body[..idx], &body[idx..]),
            None => (body, ""),
        };
        let source = match source_part.strip_prefix('~') {
            Some(path) => RuleSource::Path(path.to_string()),
            None => RuleSource::Literal(source_part.to_string()),
        };

        let mut substitutions = Vec::new();
        let mut rest = subst_part;
        while !rest.is_empty() {
            let Some(after) = rest.strip_prefix(":s/") else {
                return Err(RsrError::InvalidSubstitution(raw.to_string()));
            };
            let (pattern, after) = take_until_unescaped(after, '/')
                .ok_or_else(|| RsrError::InvalidSubstitution(raw.to_string()))?;
            let (replacement, after) = take_until_unescaped(after, '/')
                .ok_or_else(|| RsrError::InvalidSubstitution(raw.to_string()))?;
            let pattern = Regex::new(&pattern).map_err(|source| RsrError::InvalidRegex {
                rule: raw.to_string(),
                source,
            })?;
            substitutions.push(Substitution {
                pattern,
                replacement: replacement.replace("\\/", "/"),
            });
            rest = after;
        }

        Ok(ValueRule {
            source,
            substitutions,
            converters,
        })
    }

    /// Evaluate against a path lookup. `None` means the dynamic source was
    /// absent; mandatory handling is the caller's.
    pub fn evaluate(
        &self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Option<String>, RsrError> {
        let mut value = match &self.source {
            RuleSource::Literal(literal) => literal.clone(),
            RuleSource::Path(path) => match lookup(path) {
                Some(found) => found,
                None => return Ok(None),
            },
        };
        for substitution in &self.substitutions {
            value = substitution
                .pattern
                .replace_all(&value, substitution.replacement.as_str())
                .into_owned();
        }
        for converter in &self.converters {
            value = converter.apply(&value)?;
        }
        Ok(Some(value))
    }
}

/// Parse a `;`-separated template value into its rules.
pub fn parse_rules(value: &str) -> Result<Vec<ValueRule>, RsrError> {
    value
        .split(';')
        .filter(|part| !part.is_empty())
        .map(ValueRule::parse)
        .collect()
}

fn split_converters(raw: &str) -> Result<(&str, Vec<Converter>), RsrError> {
    if !raw.ends_with('}') {
        return Ok((raw, Vec::new()));
    }
    let Some(open) = raw.rfind('{') else {
        return Ok((raw, Vec::new()));
    };
    let converters = raw[open + 1..raw.len() - 1]
        .split(';')
        .filter(|token| !token.is_empty())
        .map(Converter::parse)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((&raw[..open], converters))
}

/// Split at the first unescaped delimiter, keeping escape sequences intact.
fn take_until_unescaped(input: &str, delim: char) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut escaped = false;
    for (idx, ch) in input.char_indices() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            out.push(ch);
            escaped = true;
        } else if ch == delim {
            return Some((out, &input[idx + ch.len_utf8()..]));
        } else {
            out.push(ch);
        }
    }
    None
}

/// Parse a duration into signed nanoseconds. Bare integers are nanoseconds,
/// bare floats are seconds, otherwise a unit-suffixed form (`1h2m3s`, `10ms`).
pub fn parse_duration_nanos(input: &str) -> Result<i64, RsrError> {
    let trimmed = input.trim();
    if let Ok(nanos) = trimmed.parse::<i64>() {
        return Ok(nanos);
    }
    if let Ok(seconds) = trimmed.parse::<f64>() {
        return Ok((seconds * 1e9) as i64);
    }
    parse_unit_duration(trimmed).ok_or_else(|| RsrError::InvalidDuration(input.to_string()))
}

fn parse_unit_duration(input: &str) -> Option<i64> {
    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    if rest.is_empty() {
        return None;
    }
    let mut total = 0f64;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let (scale, advance) = if rest.starts_with("ns") {
            (1f64, 2)
        } else if rest.starts_with("us") || rest.starts_with("µs") {
            (1e3, if rest.starts_with("µs") { "µs".len() } else { 2 })
        } else if rest.starts_with("ms") {
            (1e6, 2)
        } else if rest.starts_with('s') {
            (1e9, 1)
        } else if rest.starts_with('m') {
            (6e10, 1)
        } else if rest.starts_with('h') {
            (3.6e12, 1)
        } else {
            return None;
        };
        total += value * scale;
        rest = &rest[advance..];
    }
    let nanos = total as i64;
    Some(if negative { -nanos } else { nanos })
}

/// Render nanoseconds as seconds, dropping a zero fraction.
pub fn format_seconds(nanos: i64) -> String {
    if nanos % 1_000_000_000 == 0 {
        (nanos / 1_000_000_000).to_string()
    } else {
        trim_decimal(&format!("{:.9}", nanos as f64 / 1e9))
    }
}

fn trim_decimal(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    value.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Parse a timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or unix
/// seconds/nanoseconds.
pub fn parse_time(input: &str) -> Result<DateTime<Utc>, RsrError> {
    let trimmed = input.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(stamp) = trimmed.parse::<i64>() {
        if trimmed.len() > 11 {
            return Ok(DateTime::from_timestamp_nanos(stamp));
        }
        if let Some(parsed) = DateTime::from_timestamp(stamp, 0) {
            return Ok(parsed);
        }
    }
    Err(RsrError::InvalidTime(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_none(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn literal_rule() {
        let rule = ValueRule::parse("*voice").unwrap();
        assert_eq!(rule.evaluate(&lookup_none).unwrap().as_deref(), Some("*voice"));
    }

    #[test]
    fn dynamic_rule_missing_source() {
        let rule = ValueRule::parse("~*req.User-Name").unwrap();
        assert_eq!(rule.evaluate(&lookup_none).unwrap(), None);
    }

    #[test]
    fn substitution_chain_is_ordered() {
        let rule = ValueRule::parse(r"~*req.Dest:s/^\+49(\d+)$/0$1/:s/^0049(\d+)$/0$1/").unwrap();
        let lookup = |path: &str| match path {
            "*req.Dest" => Some("+4971123456".to_string()),
            _ => None,
        };
        assert_eq!(
            rule.evaluate(&lookup).unwrap().as_deref(),
            Some("071123456")
        );
    }

    // applying chain A then chain B equals applying the concatenated chain
    #[test]
    fn substitution_chains_compose() {
        let chain_a = ValueRule::parse(r"~*req.X:s/a/b/").unwrap();
        let chain_b = ValueRule::parse(r"~*req.X:s/b/c/").unwrap();
        let combined = ValueRule::parse(r"~*req.X:s/a/b/:s/b/c/").unwrap();

        let lookup = |_: &str| Some("banana".to_string());
        let first = chain_a.evaluate(&lookup).unwrap().unwrap();
        let relookup = move |_: &str| Some(first.clone());
        let sequential = chain_b.evaluate(&relookup).unwrap().unwrap();
        let direct = combined.evaluate(&lookup).unwrap().unwrap();
        assert_eq!(sequential, direct);
    }

    #[test]
    fn escaped_delimiter_in_pattern() {
        let rule = ValueRule::parse(r"~*req.Uri:s/^sip:\/\///").unwrap();
        let lookup = |_: &str| Some("sip://host".to_string());
        assert_eq!(rule.evaluate(&lookup).unwrap().as_deref(), Some("host"));
    }

    #[test]
    fn malformed_substitution_is_rejected() {
        assert!(ValueRule::parse("~*req.X:s/unterminated").is_err());
        assert!(ValueRule::parse("~*req.X:s/(/x/").is_err());
    }

    #[test]
    fn duration_seconds_converter() {
        let rule = ValueRule::parse("~*cgrep.MaxUsage{*duration_seconds}").unwrap();
        let lookup = |_: &str| Some("3600000000000".to_string());
        assert_eq!(rule.evaluate(&lookup).unwrap().as_deref(), Some("3600"));
    }

    #[test]
    fn round_converter() {
        assert_eq!(Converter::Round(2).apply("1.23456").unwrap(), "1.23");
        assert_eq!(Converter::Round(2).apply("3").unwrap(), "3");
    }

    #[test]
    fn unknown_converter_is_rejected() {
        assert!(matches!(
            ValueRule::parse("~*req.X{*bogus}"),
            Err(RsrError::UnknownConverter(_))
        ));
    }

    #[test]
    fn duration_parsing_forms() {
        assert_eq!(parse_duration_nanos("3600000000000").unwrap(), 3_600_000_000_000);
        assert_eq!(parse_duration_nanos("1h30m").unwrap(), 5_400_000_000_000);
        assert_eq!(parse_duration_nanos("0s").unwrap(), 0);
        assert_eq!(parse_duration_nanos("-1").unwrap(), -1);
        assert_eq!(parse_duration_nanos("1.5").unwrap(), 1_500_000_000);
        assert!(parse_duration_nanos("abc").is_err());
    }

    #[test]
    fn time_parsing_forms() {
        let rfc3339 = parse_time("2018-01-07T17:00:21Z").unwrap();
        let sql = parse_time("2018-01-07 17:00:21").unwrap();
        assert_eq!(rfc3339, sql);
        assert_eq!(parse_time("1515344421").unwrap(), rfc3339);
        assert!(parse_time("not-a-time").is_err());
    }
}
