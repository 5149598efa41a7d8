//! The RADIUS server driver: two concurrent UDP listeners (authentication,
//! accounting) sharing client secrets, dictionaries and the processor
//! pipeline. Malformed packets, unknown clients and pipeline errors drop the
//! datagram with a log entry; only listener bind failures are fatal.

use super::dp::RadiusDataProvider;
use super::processor::{RadiusCtx, RequestPipeline};
use super::request::AgentRequest;
use super::{AgentError, META_RAD_AUTH, META_RAD_REPLY_CODE, META_RAD_REQ_TYPE};
use crate::config::RadiusAgentCfg;
use crate::nav::{parse_path, NavMap, NavValue};
use ipnetwork::IpNetwork;
use radius_proto::auth::{sign_reply, verify_accounting_request};
use radius_proto::dictionary::Dictionary;
use radius_proto::{AcctStatusType, Attribute, Code, Packet};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const META_DEFAULT: &str = "*default";

/// Per-client shared secrets: exact IP, CIDR network, or `*default`.
pub struct ClientSecrets {
    entries: HashMap<String, String>,
}

impl ClientSecrets {
    pub fn new(entries: HashMap<String, String>) -> Self {
        ClientSecrets { entries }
    }

    pub fn for_ip(&self, ip: IpAddr) -> Option<&str> {
        if let Some(secret) = self.entries.get(&ip.to_string()) {
            return Some(secret);
        }
        for (key, secret) in &self.entries {
            if key == META_DEFAULT {
                continue;
            }
            if let Ok(network) = key.parse::<IpNetwork>() {
                if network.contains(ip) {
                    return Some(secret);
                }
            }
        }
        self.entries.get(META_DEFAULT).map(String::as_str)
    }
}

/// Per-client dictionaries with the built-in RFC 2865 set as fallback.
pub struct ClientDictionaries {
    dicts: HashMap<String, Arc<Dictionary>>,
    default: Arc<Dictionary>,
}

impl ClientDictionaries {
    pub fn load(paths: &HashMap<String, String>) -> Result<Self, AgentError> {
        let mut dicts = HashMap::new();
        let mut default = None;
        for (client, path) in paths {
            info!(client = %client, path = %path, "loading dictionary folder");
            let dict = Arc::new(Dictionary::from_folder_with_rfc2865(path)?);
            if client == META_DEFAULT {
                default = Some(Arc::clone(&dict));
            }
            dicts.insert(client.clone(), dict);
        }
        Ok(ClientDictionaries {
            dicts,
            default: default.unwrap_or_else(|| Arc::new(Dictionary::rfc2865())),
        })
    }

    pub fn for_ip(&self, ip: IpAddr) -> Arc<Dictionary> {
        self.dicts
            .get(&ip.to_string())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Auth,
    Acct,
}

/// The RADIUS front-end.
pub struct RadiusAgent {
    cfg: RadiusAgentCfg,
    pipeline: Arc<RequestPipeline>,
    secrets: ClientSecrets,
    dictionaries: ClientDictionaries,
}

impl RadiusAgent {
    pub fn new(cfg: RadiusAgentCfg, pipeline: Arc<RequestPipeline>) -> Result<Self, AgentError> {
        let secrets = ClientSecrets::new(cfg.client_secrets.clone());
        let dictionaries = ClientDictionaries::load(&cfg.client_dictionaries)?;
        Ok(RadiusAgent {
            cfg,
            pipeline,
            secrets,
            dictionaries,
        })
    }

    /// Bind both listeners and serve until shutdown. Bind failure is
    /// surfaced to the supervisor.
    pub async fn listen_and_serve(
        self: Arc<Self>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<(), AgentError> {
        let auth_socket = Arc::new(UdpSocket::bind(&self.cfg.listen_auth).await?);
        let acct_socket = Arc::new(UdpSocket::bind(&self.cfg.listen_acct).await?);
        info!(addr = %self.cfg.listen_auth, "listening for auth requests");
        info!(addr = %self.cfg.listen_acct, "listening for acct requests");

        let auth_task = tokio::spawn(Arc::clone(&self).serve_socket(
            auth_socket,
            ListenerKind::Auth,
            shutdown.subscribe(),
        ));
        let acct_task = tokio::spawn(Arc::clone(&self).serve_socket(
            acct_socket,
            ListenerKind::Acct,
            shutdown.subscribe(),
        ));
        let (auth_result, acct_result) = tokio::join!(auth_task, acct_task);
        auth_result.unwrap_or(Ok(()))?;
        acct_result.unwrap_or(Ok(()))
    }

    /// Bind both listeners without serving; used when binding port 0.
    pub async fn bind(&self) -> Result<(Arc<UdpSocket>, Arc<UdpSocket>), AgentError> {
        let auth = Arc::new(UdpSocket::bind(&self.cfg.listen_auth).await?);
        let acct = Arc::new(UdpSocket::bind(&self.cfg.listen_acct).await?);
        Ok((auth, acct))
    }

    /// Serve one bound socket until shutdown; used directly by tests.
    pub async fn serve_auth_socket(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), AgentError> {
        self.serve_socket(socket, ListenerKind::Auth, shutdown).await
    }

    pub async fn serve_acct_socket(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), AgentError> {
        self.serve_socket(socket, ListenerKind::Acct, shutdown).await
    }

    async fn serve_socket(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        kind: ListenerKind,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), AgentError> {
        let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(?kind, "listener shutting down");
                    return Ok(());
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, addr) = received?;
                    let data = buf[..len].to_vec();
                    let agent = Arc::clone(&self);
                    let socket = Arc::clone(&socket);
                    tokio::spawn(async move {
                        agent.handle_datagram(socket, data, addr, kind).await;
                    });
                }
            }
        }
    }

    async fn handle_datagram(
        &self,
        socket: Arc<UdpSocket>,
        data: Vec<u8>,
        addr: SocketAddr,
        kind: ListenerKind,
    ) {
        let Some(secret) = self.secrets.for_ip(addr.ip()) else {
            warn!(client_ip = %addr.ip(), "dropping request from unknown client");
            return;
        };
        let request = match Packet::decode(&data) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(client_ip = %addr.ip(), error = %err, "dropping malformed packet");
                return;
            }
        };
        let (expected, reply_code) = match kind {
            ListenerKind::Auth => (Code::AccessRequest, Code::AccessAccept),
            ListenerKind::Acct => (Code::AccountingRequest, Code::AccountingResponse),
        };
        if request.code != expected {
            warn!(client_ip = %addr.ip(), code = %request.code, "unexpected packet code");
            return;
        }
        if kind == ListenerKind::Acct && !verify_accounting_request(&data, secret.as_bytes()) {
            warn!(client_ip = %addr.ip(), "accounting request authenticator mismatch");
            return;
        }

        let dictionary = self.dictionaries.for_ip(addr.ip());
        let mut reply = request.reply(reply_code);

        let provider = Arc::new(RadiusDataProvider::new(
            request.clone(),
            Arc::clone(&dictionary),
        ));
        let mut areq = AgentRequest::new(
            provider,
            Some(addr.to_string()),
            self.pipeline.default_tenant.clone(),
            self.pipeline.default_timezone.clone(),
        );
        match kind {
            ListenerKind::Auth => areq.vars.set(
                &parse_path(META_RAD_REQ_TYPE),
                NavValue::Text(META_RAD_AUTH.to_string()),
            ),
            ListenerKind::Acct => {
                if let Some(status) = dictionary
                    .attribute("Acct-Status-Type")
                    .and_then(|d| request.find_attribute(d.code))
                    .and_then(|a| a.as_integer().ok())
                    .and_then(AcctStatusType::from_u32)
                {
                    areq.vars.set(
                        &parse_path(META_RAD_REQ_TYPE),
                        NavValue::Text(status.name().to_string()),
                    );
                }
            }
        }

        let outcome = {
            let mut ctx = RadiusCtx {
                request: &request,
                reply: &mut reply,
                dictionary: &dictionary,
                secret: secret.as_bytes(),
            };
            self.pipeline.handle(&mut areq, Some(&mut ctx)).await
        };
        match outcome {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    client_ip = %addr.ip(),
                    request_id = request.identifier,
                    "no request processor enabled, ignoring request"
                );
                return;
            }
            Err(err) => {
                error!(
                    client_ip = %addr.ip(),
                    request_id = request.identifier,
                    error = %err,
                    "error processing request, ignoring"
                );
                return;
            }
        }

        if let Err(err) = append_reply_attributes(&mut reply, &areq.reply, &dictionary) {
            error!(client_ip = %addr.ip(), error = %err, "cannot compose reply");
            return;
        }
        let encoded = match sign_reply(&mut reply, secret.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(client_ip = %addr.ip(), error = %err, "cannot sign reply");
                return;
            }
        };
        if let Err(err) = socket.send_to(&encoded, addr).await {
            warn!(client_ip = %addr.ip(), error = %err, "cannot send reply");
            return;
        }
        debug!(
            client_ip = %addr.ip(),
            code = %reply.code,
            request_id = reply.identifier,
            "sent RADIUS reply"
        );
    }
}

/// Walk the composed `*rep` tree in insertion order and append the encoded
/// attributes. The `*radReplyCode` pseudo-attribute overrides the reply code.
pub fn append_reply_attributes(
    reply: &mut Packet,
    rep: &NavMap,
    dictionary: &Dictionary,
) -> Result<(), AgentError> {
    for (path, value) in rep.ordered_fields() {
        let rendered = value.to_string();
        let items = parse_path(&path);
        if items.len() == 1 && items[0].name == META_RAD_REPLY_CODE {
            reply.code = code_from_name(&rendered)?;
            continue;
        }
        let attribute = match items.len() {
            1 => {
                let attr = dictionary
                    .attribute(&items[0].name)
                    .ok_or_else(|| AgentError::UnknownReplyAttribute(path.clone()))?;
                Attribute::new(attr.code, attr.kind.encode(&rendered)?)?
            }
            2 => {
                let (vendor_id, attr) = dictionary
                    .vendor_attribute(&items[0].name, &items[1].name)
                    .ok_or_else(|| AgentError::UnknownReplyAttribute(path.clone()))?;
                Attribute::vendor(vendor_id, attr.code, attr.kind.encode(&rendered)?)?
            }
            _ => return Err(AgentError::UnknownReplyAttribute(path.clone())),
        };
        reply.add_attribute(attribute);
    }
    Ok(())
}

fn code_from_name(name: &str) -> Result<Code, AgentError> {
    match name {
        "AccessAccept" | "Access-Accept" => Ok(Code::AccessAccept),
        "AccessReject" | "Access-Reject" => Ok(Code::AccessReject),
        "AccessChallenge" | "Access-Challenge" => Ok(Code::AccessChallenge),
        "AccountingResponse" | "Accounting-Response" => Ok(Code::AccountingResponse),
        other => match other.parse::<u8>().ok().and_then(Code::from_u8) {
            Some(code) => Ok(code),
            None => Err(AgentError::UnknownReplyCode(name.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_match_exact_cidr_then_default() {
        let mut entries = HashMap::new();
        entries.insert("10.0.0.1".to_string(), "exact".to_string());
        entries.insert("192.168.0.0/16".to_string(), "network".to_string());
        entries.insert("*default".to_string(), "fallback".to_string());
        let secrets = ClientSecrets::new(entries);

        assert_eq!(secrets.for_ip("10.0.0.1".parse().unwrap()), Some("exact"));
        assert_eq!(
            secrets.for_ip("192.168.12.7".parse().unwrap()),
            Some("network")
        );
        assert_eq!(secrets.for_ip("172.16.0.9".parse().unwrap()), Some("fallback"));
    }

    #[test]
    fn secrets_without_default_reject_unknown() {
        let mut entries = HashMap::new();
        entries.insert("10.0.0.1".to_string(), "exact".to_string());
        let secrets = ClientSecrets::new(entries);
        assert_eq!(secrets.for_ip("10.0.0.2".parse().unwrap()), None);
    }

    #[test]
    fn reply_attributes_follow_rep_order() {
        let dictionary = Dictionary::rfc2865();
        let mut reply = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        let mut rep = NavMap::new();
        rep.set(
            &parse_path("Reply-Message"),
            NavValue::Text("welcome".to_string()),
        );
        rep.set(&parse_path("Session-Timeout"), NavValue::Integer(3600));
        append_reply_attributes(&mut reply, &rep, &dictionary).unwrap();

        assert_eq!(reply.attributes.len(), 2);
        assert_eq!(reply.attributes[0].as_string().unwrap(), "welcome");
        assert_eq!(reply.attributes[1].as_integer().unwrap(), 3600);
    }

    #[test]
    fn rad_reply_code_overrides_packet_code() {
        let dictionary = Dictionary::rfc2865();
        let mut reply = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        let mut rep = NavMap::new();
        rep.set(
            &parse_path(META_RAD_REPLY_CODE),
            NavValue::Text("AccessReject".to_string()),
        );
        append_reply_attributes(&mut reply, &rep, &dictionary).unwrap();
        assert_eq!(reply.code, Code::AccessReject);
        assert!(reply.attributes.is_empty());
    }

    #[test]
    fn unknown_reply_attribute_is_an_error() {
        let dictionary = Dictionary::rfc2865();
        let mut reply = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        let mut rep = NavMap::new();
        rep.set(&parse_path("No-Such-Attr"), NavValue::Integer(1));
        assert!(matches!(
            append_reply_attributes(&mut reply, &rep, &dictionary),
            Err(AgentError::UnknownReplyAttribute(_))
        ));
    }
}
