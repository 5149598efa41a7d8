use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A flag token set with optional comma-separated parameters, e.g.
/// `*attributes:AttrPrfl1,AttrPrfl2` or plain `*continue`.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    entries: Vec<(String, Vec<String>)>,
}

impl Flags {
    pub fn parse(tokens: &[String]) -> Self {
        let entries = tokens
            .iter()
            .map(|token| match token.split_once(':') {
                Some((key, params)) => (
                    key.to_string(),
                    params
                        .split(',')
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect(),
                ),
                None => (token.clone(), Vec::new()),
            })
            .collect();
        Flags { entries }
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn params(&self, key: &str) -> Vec<String> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, params)| params.clone())
            .unwrap_or_default()
    }

    /// All flags flattened back into their configured token form.
    pub fn slice(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(key, params)| {
                if params.is_empty() {
                    key.clone()
                } else {
                    format!("{key}:{}", params.join(","))
                }
            })
            .collect()
    }
}

/// One declarative field mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTemplateCfg {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub blocker: bool,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl FieldTemplateCfg {
    /// Tag when present, else the path; used in error reports.
    pub fn label(&self) -> String {
        self.tag.clone().unwrap_or_else(|| self.path.clone())
    }
}

/// One entry of the request-processor chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestProcessorCfg {
    pub id: String,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub request_fields: Vec<FieldTemplateCfg>,
    #[serde(default)]
    pub reply_fields: Vec<FieldTemplateCfg>,
}

impl RequestProcessorCfg {
    pub fn flags(&self) -> Flags {
        Flags::parse(&self.flags)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralCfg {
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralCfg {
    fn default() -> Self {
        GeneralCfg {
            default_tenant: default_tenant(),
            default_timezone: default_timezone(),
            log_level: default_log_level(),
        }
    }
}

fn default_tenant() -> String {
    "example.org".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_net() -> String {
    "udp".to_string()
}

fn default_listen_auth() -> String {
    "127.0.0.1:1812".to_string()
}

fn default_listen_acct() -> String {
    "127.0.0.1:1813".to_string()
}

/// The RADIUS front-end: two listeners sharing secrets and dictionaries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RadiusAgentCfg {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen_net")]
    pub listen_net: String,
    #[serde(default = "default_listen_auth")]
    pub listen_auth: String,
    #[serde(default = "default_listen_acct")]
    pub listen_acct: String,
    /// Shared secret per client address (exact IP or CIDR), `*default` as
    /// the fallback entry.
    #[serde(default)]
    pub client_secrets: HashMap<String, String>,
    /// Dictionary folder per client address, `*default` as the fallback;
    /// the built-in RFC 2865 dictionary is always layered underneath.
    #[serde(default)]
    pub client_dictionaries: HashMap<String, String>,
    #[serde(default)]
    pub sessions_conns: Vec<String>,
    #[serde(default)]
    pub request_processors: Vec<RequestProcessorCfg>,
}

/// One CSV source of a loader type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderDataCfg {
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldTemplateCfg>,
}

fn default_lock_filename() -> String {
    ".cgr.lck".to_string()
}

fn default_field_separator() -> String {
    ",".to_string()
}

fn default_caching() -> String {
    "*reload".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderCfg {
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default)]
    pub dry_run: bool,
    pub tp_in_dir: String,
    pub tp_out_dir: String,
    #[serde(default = "default_lock_filename")]
    pub lock_filename: String,
    #[serde(default = "default_field_separator")]
    pub field_separator: String,
    #[serde(default = "default_caching")]
    pub caching: String,
    #[serde(default)]
    pub cache_conns: Vec<String>,
    #[serde(default)]
    pub data: Vec<LoaderDataCfg>,
}

impl LoaderCfg {
    pub fn separator_byte(&self) -> Result<u8, ConfigError> {
        let bytes = self.field_separator.as_bytes();
        if bytes.len() != 1 {
            return Err(ConfigError::Invalid(format!(
                "loader <{}> field_separator must be a single byte, got {:?}",
                self.id, self.field_separator
            )));
        }
        Ok(bytes[0])
    }
}

/// Top-level agent configuration, loaded from a single JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralCfg,
    #[serde(default)]
    pub radius_agent: RadiusAgentCfg,
    /// Named template sets referenced by `*template` fields.
    #[serde(default)]
    pub templates: HashMap<String, Vec<FieldTemplateCfg>>,
    #[serde(default)]
    pub loaders: Vec<LoaderCfg>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.radius_agent.enabled {
            if self.radius_agent.listen_net != "udp" {
                return Err(ConfigError::Invalid(format!(
                    "unsupported listen_net <{}>",
                    self.radius_agent.listen_net
                )));
            }
            for (name, addr) in [
                ("listen_auth", &self.radius_agent.listen_auth),
                ("listen_acct", &self.radius_agent.listen_acct),
            ] {
                addr.parse::<SocketAddr>().map_err(|_| {
                    ConfigError::Invalid(format!("invalid {name} address: {addr}"))
                })?;
            }
            if self.radius_agent.sessions_conns.is_empty() {
                return Err(ConfigError::Invalid(
                    "radius_agent needs at least one sessions connection".to_string(),
                ));
            }
            for processor in &self.radius_agent.request_processors {
                let flags = processor.flags();
                if crate::agent::processor::ActionKind::from_flags(&flags).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "request processor <{}> has no action flag",
                        processor.id
                    )));
                }
            }
        }
        for loader in &self.loaders {
            loader.separator_byte()?;
            if loader.enabled && loader.data.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "loader <{}> has no data sections",
                    loader.id
                )));
            }
            if !matches!(
                loader.caching.as_str(),
                "*none" | "*reload" | "*load" | "*remove" | "*clear"
            ) {
                return Err(ConfigError::Invalid(format!(
                    "loader <{}> has unknown caching option <{}>",
                    loader.id, loader.caching
                )));
            }
        }
        Ok(())
    }

    /// A runnable starting point written next to the binary on first start.
    pub fn example() -> Self {
        let mut client_secrets = HashMap::new();
        client_secrets.insert("*default".to_string(), "CGRateS.org".to_string());
        Config {
            general: GeneralCfg::default(),
            radius_agent: RadiusAgentCfg {
                enabled: true,
                listen_net: default_listen_net(),
                listen_auth: default_listen_auth(),
                listen_acct: default_listen_acct(),
                client_secrets,
                client_dictionaries: HashMap::new(),
                sessions_conns: vec!["127.0.0.1:2012".to_string()],
                request_processors: vec![RequestProcessorCfg {
                    id: "VoiceAuth".to_string(),
                    filters: vec!["*string:~*vars.*radReqType:*radAuth".to_string()],
                    flags: vec!["*authorize".to_string(), "*accounts".to_string()],
                    tenant: None,
                    timezone: None,
                    request_fields: vec![
                        FieldTemplateCfg {
                            tag: Some("ToR".to_string()),
                            path: "*cgreq.ToR".to_string(),
                            field_type: "*constant".to_string(),
                            value: "*voice".to_string(),
                            mandatory: false,
                            blocker: false,
                            filters: Vec::new(),
                        },
                        FieldTemplateCfg {
                            tag: Some("Account".to_string()),
                            path: "*cgreq.Account".to_string(),
                            field_type: "*variable".to_string(),
                            value: "~*req.User-Name".to_string(),
                            mandatory: true,
                            blocker: false,
                            filters: Vec::new(),
                        },
                    ],
                    reply_fields: vec![FieldTemplateCfg {
                        tag: Some("SessionTimeout".to_string()),
                        path: "*rep.Session-Timeout".to_string(),
                        field_type: "*variable".to_string(),
                        value: "~*cgrep.MaxUsage{*duration_seconds}".to_string(),
                        mandatory: false,
                        blocker: false,
                        filters: Vec::new(),
                    }],
                }],
            },
            templates: HashMap::new(),
            loaders: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_validates() {
        assert!(Config::example().validate().is_ok());
    }

    #[test]
    fn flags_parse_params() {
        let flags = Flags::parse(&[
            "*authorize".to_string(),
            "*attributes:AttrPrfl1,AttrPrfl2".to_string(),
            "*continue".to_string(),
        ]);
        assert!(flags.has("*authorize"));
        assert!(flags.has("*continue"));
        assert_eq!(flags.params("*attributes"), vec!["AttrPrfl1", "AttrPrfl2"]);
        assert!(flags.params("*authorize").is_empty());
        assert!(!flags.has("*terminate"));
        assert_eq!(
            flags.slice(),
            vec!["*authorize", "*attributes:AttrPrfl1,AttrPrfl2", "*continue"]
        );
    }

    #[test]
    fn processor_without_action_flag_is_rejected() {
        let mut config = Config::example();
        config.radius_agent.request_processors[0].flags = vec!["*continue".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let mut config = Config::example();
        config.radius_agent.listen_auth = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loader_separator_must_be_single_byte() {
        let loader = LoaderCfg {
            id: "tpl".to_string(),
            enabled: true,
            tenant: default_tenant(),
            dry_run: false,
            tp_in_dir: "/tmp/in".to_string(),
            tp_out_dir: "/tmp/out".to_string(),
            lock_filename: default_lock_filename(),
            field_separator: ";;".to_string(),
            caching: default_caching(),
            cache_conns: Vec::new(),
            data: Vec::new(),
        };
        assert!(loader.separator_byte().is_err());
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = std::env::temp_dir().join("charge-agent-config-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let config = Config::example();
        config.to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.radius_agent.listen_auth, config.radius_agent.listen_auth);
        assert_eq!(loaded.radius_agent.request_processors.len(), 1);
        fs::remove_file(&path).unwrap();
    }
}
