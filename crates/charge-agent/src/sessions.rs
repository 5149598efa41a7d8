//! Typed envelopes for the session service and the cache service.
//!
//! Method names are fixed wire strings; envelopes carry the ancillary flags
//! of the owning processor, the charging event, dispatcher arguments and,
//! where the method supports route queries, the route paginator.

use crate::rpc::{RpcClient, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const SESSIONS_AUTHORIZE_EVENT: &str = "SessionSv1.AuthorizeEvent";
pub const SESSIONS_INITIATE_SESSION: &str = "SessionSv1.InitiateSession";
pub const SESSIONS_UPDATE_SESSION: &str = "SessionSv1.UpdateSession";
pub const SESSIONS_TERMINATE_SESSION: &str = "SessionSv1.TerminateSession";
pub const SESSIONS_PROCESS_MESSAGE: &str = "SessionSv1.ProcessMessage";
pub const SESSIONS_PROCESS_EVENT: &str = "SessionSv1.ProcessEvent";
pub const SESSIONS_PROCESS_CDR: &str = "SessionSv1.ProcessCDR";

pub const CACHE_RELOAD_CACHE: &str = "CacheSv1.ReloadCache";
pub const CACHE_LOAD_CACHE: &str = "CacheSv1.LoadCache";
pub const CACHE_REMOVE_ITEM: &str = "CacheSv1.RemoveItem";
pub const CACHE_CLEAR: &str = "CacheSv1.Clear";

/// Rating-layer errors carry this prefix and signal zero-usage fallback.
pub const RALS_ERROR_PREFIX: &str = "RALS_ERROR";

pub fn is_rals_error(err: &RpcError) -> bool {
    matches!(err, RpcError::Remote(message) if message.starts_with(RALS_ERROR_PREFIX))
}

/// The normalised charging event produced from an inbound packet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CgrEvent {
    #[serde(rename = "Tenant")]
    pub tenant: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Time", skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(rename = "Event")]
    pub event: serde_json::Map<String, Value>,
}

impl CgrEvent {
    pub fn new(tenant: impl Into<String>, event: serde_json::Map<String, Value>) -> Self {
        CgrEvent {
            tenant: tenant.into(),
            id: format!("{:x}", rand::random::<u64>()),
            time: None,
            event,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgDispatcher {
    #[serde(rename = "APIKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "RouteID", skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePaginator {
    #[serde(rename = "Limit", skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(rename = "Offset", skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// Dispatcher args and paginator pulled from `*opts`.
#[derive(Debug, Clone, Default)]
pub struct ExtractedArgs {
    pub dispatcher: Option<ArgDispatcher>,
    pub paginator: RoutePaginator,
}

/// Extract dispatcher arguments (`*apiKey`, `*routeID`) and, for the
/// route-capable methods, the paginator (`*routesLimit`, `*routesOffset`).
pub fn extract_args(
    opts: &serde_json::Map<String, Value>,
    dispatchers_required: bool,
    with_paginator: bool,
) -> Result<ExtractedArgs, String> {
    let as_string = |key: &str| {
        opts.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };
    let api_key = as_string("*apiKey");
    let route_id = as_string("*routeID");
    if dispatchers_required && api_key.is_none() {
        return Err("MANDATORY_IE_MISSING: [ApiKey]".to_string());
    }
    let dispatcher = if api_key.is_some() || route_id.is_some() {
        Some(ArgDispatcher { api_key, route_id })
    } else {
        None
    };
    let mut paginator = RoutePaginator::default();
    if with_paginator {
        paginator.limit = as_string("*routesLimit").and_then(|v| v.parse().ok());
        paginator.offset = as_string("*routesOffset").and_then(|v| v.parse().ok());
    }
    Ok(ExtractedArgs {
        dispatcher,
        paginator,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct V1AuthorizeArgs {
    #[serde(rename = "GetAttributes")]
    pub get_attributes: bool,
    #[serde(rename = "AttributeIDs", skip_serializing_if = "Vec::is_empty")]
    pub attribute_ids: Vec<String>,
    #[serde(rename = "AuthorizeResources")]
    pub authorize_resources: bool,
    #[serde(rename = "GetMaxUsage")]
    pub get_max_usage: bool,
    #[serde(rename = "ProcessThresholds")]
    pub process_thresholds: bool,
    #[serde(rename = "ThresholdIDs", skip_serializing_if = "Vec::is_empty")]
    pub threshold_ids: Vec<String>,
    #[serde(rename = "ProcessStats")]
    pub process_stats: bool,
    #[serde(rename = "StatIDs", skip_serializing_if = "Vec::is_empty")]
    pub stat_ids: Vec<String>,
    #[serde(rename = "GetRoutes")]
    pub get_routes: bool,
    #[serde(rename = "RoutesIgnoreErrors")]
    pub routes_ignore_errors: bool,
    #[serde(rename = "RoutesMaxCost", skip_serializing_if = "Option::is_none")]
    pub routes_max_cost: Option<String>,
    #[serde(rename = "ForceDuration")]
    pub force_duration: bool,
    #[serde(rename = "CGREvent")]
    pub cgr_event: CgrEvent,
    #[serde(rename = "ArgDispatcher", skip_serializing_if = "Option::is_none")]
    pub arg_dispatcher: Option<ArgDispatcher>,
    #[serde(rename = "Paginator")]
    pub paginator: RoutePaginator,
    #[serde(rename = "Opts", skip_serializing_if = "serde_json::Map::is_empty")]
    pub opts: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct V1AuthorizeReply {
    #[serde(rename = "Attributes", skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(rename = "ResourceAllocation", skip_serializing_if = "Option::is_none")]
    pub resource_allocation: Option<String>,
    #[serde(rename = "MaxUsage", skip_serializing_if = "Option::is_none")]
    pub max_usage: Option<i64>,
    #[serde(rename = "RouteProfiles", skip_serializing_if = "Option::is_none")]
    pub routes: Option<Value>,
    #[serde(rename = "ThresholdIDs", skip_serializing_if = "Option::is_none")]
    pub threshold_ids: Option<Vec<String>>,
    #[serde(rename = "StatQueueIDs", skip_serializing_if = "Option::is_none")]
    pub stat_queue_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct V1InitSessionArgs {
    #[serde(rename = "GetAttributes")]
    pub get_attributes: bool,
    #[serde(rename = "AttributeIDs", skip_serializing_if = "Vec::is_empty")]
    pub attribute_ids: Vec<String>,
    #[serde(rename = "AllocateResources")]
    pub allocate_resources: bool,
    #[serde(rename = "ProcessThresholds")]
    pub process_thresholds: bool,
    #[serde(rename = "ThresholdIDs", skip_serializing_if = "Vec::is_empty")]
    pub threshold_ids: Vec<String>,
    #[serde(rename = "ProcessStats")]
    pub process_stats: bool,
    #[serde(rename = "StatIDs", skip_serializing_if = "Vec::is_empty")]
    pub stat_ids: Vec<String>,
    #[serde(rename = "InitSession")]
    pub init_session: bool,
    #[serde(rename = "ForceDuration")]
    pub force_duration: bool,
    #[serde(rename = "CGREvent")]
    pub cgr_event: CgrEvent,
    #[serde(rename = "ArgDispatcher", skip_serializing_if = "Option::is_none")]
    pub arg_dispatcher: Option<ArgDispatcher>,
    #[serde(rename = "Opts", skip_serializing_if = "serde_json::Map::is_empty")]
    pub opts: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct V1InitSessionReply {
    #[serde(rename = "Attributes", skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(rename = "ResourceAllocation", skip_serializing_if = "Option::is_none")]
    pub resource_allocation: Option<String>,
    #[serde(rename = "MaxUsage", skip_serializing_if = "Option::is_none")]
    pub max_usage: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct V1UpdateSessionArgs {
    #[serde(rename = "GetAttributes")]
    pub get_attributes: bool,
    #[serde(rename = "AttributeIDs", skip_serializing_if = "Vec::is_empty")]
    pub attribute_ids: Vec<String>,
    #[serde(rename = "UpdateSession")]
    pub update_session: bool,
    #[serde(rename = "ForceDuration")]
    pub force_duration: bool,
    #[serde(rename = "CGREvent")]
    pub cgr_event: CgrEvent,
    #[serde(rename = "ArgDispatcher", skip_serializing_if = "Option::is_none")]
    pub arg_dispatcher: Option<ArgDispatcher>,
    #[serde(rename = "Opts", skip_serializing_if = "serde_json::Map::is_empty")]
    pub opts: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct V1UpdateSessionReply {
    #[serde(rename = "Attributes", skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(rename = "MaxUsage", skip_serializing_if = "Option::is_none")]
    pub max_usage: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct V1TerminateSessionArgs {
    #[serde(rename = "TerminateSession")]
    pub terminate_session: bool,
    #[serde(rename = "ReleaseResources")]
    pub release_resources: bool,
    #[serde(rename = "ProcessThresholds")]
    pub process_thresholds: bool,
    #[serde(rename = "ThresholdIDs", skip_serializing_if = "Vec::is_empty")]
    pub threshold_ids: Vec<String>,
    #[serde(rename = "ProcessStats")]
    pub process_stats: bool,
    #[serde(rename = "StatIDs", skip_serializing_if = "Vec::is_empty")]
    pub stat_ids: Vec<String>,
    #[serde(rename = "ForceDuration")]
    pub force_duration: bool,
    #[serde(rename = "CGREvent")]
    pub cgr_event: CgrEvent,
    #[serde(rename = "ArgDispatcher", skip_serializing_if = "Option::is_none")]
    pub arg_dispatcher: Option<ArgDispatcher>,
    #[serde(rename = "Opts", skip_serializing_if = "serde_json::Map::is_empty")]
    pub opts: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct V1ProcessMessageArgs {
    #[serde(rename = "GetAttributes")]
    pub get_attributes: bool,
    #[serde(rename = "AttributeIDs", skip_serializing_if = "Vec::is_empty")]
    pub attribute_ids: Vec<String>,
    #[serde(rename = "AllocateResources")]
    pub allocate_resources: bool,
    #[serde(rename = "Debit")]
    pub debit: bool,
    #[serde(rename = "ProcessThresholds")]
    pub process_thresholds: bool,
    #[serde(rename = "ThresholdIDs", skip_serializing_if = "Vec::is_empty")]
    pub threshold_ids: Vec<String>,
    #[serde(rename = "ProcessStats")]
    pub process_stats: bool,
    #[serde(rename = "StatIDs", skip_serializing_if = "Vec::is_empty")]
    pub stat_ids: Vec<String>,
    #[serde(rename = "GetRoutes")]
    pub get_routes: bool,
    #[serde(rename = "RoutesIgnoreErrors")]
    pub routes_ignore_errors: bool,
    #[serde(rename = "RoutesMaxCost", skip_serializing_if = "Option::is_none")]
    pub routes_max_cost: Option<String>,
    #[serde(rename = "ForceDuration")]
    pub force_duration: bool,
    #[serde(rename = "CGREvent")]
    pub cgr_event: CgrEvent,
    #[serde(rename = "ArgDispatcher", skip_serializing_if = "Option::is_none")]
    pub arg_dispatcher: Option<ArgDispatcher>,
    #[serde(rename = "Paginator")]
    pub paginator: RoutePaginator,
    #[serde(rename = "Opts", skip_serializing_if = "serde_json::Map::is_empty")]
    pub opts: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct V1ProcessMessageReply {
    #[serde(rename = "Attributes", skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(rename = "ResourceAllocation", skip_serializing_if = "Option::is_none")]
    pub resource_allocation: Option<String>,
    #[serde(rename = "MaxUsage", skip_serializing_if = "Option::is_none")]
    pub max_usage: Option<i64>,
    #[serde(rename = "RouteProfiles", skip_serializing_if = "Option::is_none")]
    pub routes: Option<Value>,
    #[serde(rename = "ThresholdIDs", skip_serializing_if = "Option::is_none")]
    pub threshold_ids: Option<Vec<String>>,
    #[serde(rename = "StatQueueIDs", skip_serializing_if = "Option::is_none")]
    pub stat_queue_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct V1ProcessEventArgs {
    #[serde(rename = "Flags")]
    pub flags: Vec<String>,
    #[serde(rename = "CGREvent")]
    pub cgr_event: CgrEvent,
    #[serde(rename = "ArgDispatcher", skip_serializing_if = "Option::is_none")]
    pub arg_dispatcher: Option<ArgDispatcher>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct V1ProcessEventReply {
    #[serde(rename = "Attributes", skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(rename = "MaxUsage", skip_serializing_if = "Option::is_none")]
    pub max_usage: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CgrEventWithDispatcher {
    #[serde(rename = "CGREvent")]
    pub cgr_event: CgrEvent,
    #[serde(rename = "ArgDispatcher", skip_serializing_if = "Option::is_none")]
    pub arg_dispatcher: Option<ArgDispatcher>,
}

/// Thin typed facade over the RPC transport. Failures are not retried at
/// this layer.
#[derive(Clone)]
pub struct SessionsFacade {
    client: Arc<dyn RpcClient>,
}

impl SessionsFacade {
    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        SessionsFacade { client }
    }

    async fn call<T, R>(&self, method: &str, args: &T) -> Result<R, RpcError>
    where
        T: Serialize + Sync,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(args)?;
        let result = self.client.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn authorize_event(
        &self,
        args: &V1AuthorizeArgs,
    ) -> Result<V1AuthorizeReply, RpcError> {
        self.call(SESSIONS_AUTHORIZE_EVENT, args).await
    }

    pub async fn initiate_session(
        &self,
        args: &V1InitSessionArgs,
    ) -> Result<V1InitSessionReply, RpcError> {
        self.call(SESSIONS_INITIATE_SESSION, args).await
    }

    pub async fn update_session(
        &self,
        args: &V1UpdateSessionArgs,
    ) -> Result<V1UpdateSessionReply, RpcError> {
        self.call(SESSIONS_UPDATE_SESSION, args).await
    }

    pub async fn terminate_session(
        &self,
        args: &V1TerminateSessionArgs,
    ) -> Result<String, RpcError> {
        self.call(SESSIONS_TERMINATE_SESSION, args).await
    }

    pub async fn process_message(
        &self,
        args: &V1ProcessMessageArgs,
    ) -> Result<V1ProcessMessageReply, RpcError> {
        self.call(SESSIONS_PROCESS_MESSAGE, args).await
    }

    pub async fn process_event(
        &self,
        args: &V1ProcessEventArgs,
    ) -> Result<V1ProcessEventReply, RpcError> {
        self.call(SESSIONS_PROCESS_EVENT, args).await
    }

    pub async fn process_cdr(&self, args: &CgrEventWithDispatcher) -> Result<String, RpcError> {
        self.call(SESSIONS_PROCESS_CDR, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rals_prefix_detection() {
        assert!(is_rals_error(&RpcError::Remote(
            "RALS_ERROR:INSUFFICIENT_CREDIT".to_string()
        )));
        assert!(!is_rals_error(&RpcError::Remote("NOT_FOUND".to_string())));
        assert!(!is_rals_error(&RpcError::ConnectionClosed));
    }

    #[test]
    fn extract_args_reads_opts() {
        let mut opts = serde_json::Map::new();
        opts.insert("*apiKey".to_string(), Value::String("key1".to_string()));
        opts.insert("*routesLimit".to_string(), Value::String("5".to_string()));
        let extracted = extract_args(&opts, true, true).unwrap();
        assert_eq!(extracted.dispatcher.unwrap().api_key.as_deref(), Some("key1"));
        assert_eq!(extracted.paginator.limit, Some(5));

        let empty = serde_json::Map::new();
        assert!(extract_args(&empty, true, false).is_err());
        let relaxed = extract_args(&empty, false, false).unwrap();
        assert!(relaxed.dispatcher.is_none());
    }

    #[test]
    fn envelope_serialisation_shape() {
        let mut event = serde_json::Map::new();
        event.insert("ToR".to_string(), Value::String("*voice".to_string()));
        let args = V1AuthorizeArgs {
            get_max_usage: true,
            cgr_event: CgrEvent::new("example.org", event),
            ..Default::default()
        };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["GetMaxUsage"], Value::Bool(true));
        assert_eq!(json["CGREvent"]["Tenant"], "example.org");
        assert_eq!(json["CGREvent"]["Event"]["ToR"], "*voice");
        // empty parameter lists stay off the wire
        assert!(json.get("AttributeIDs").is_none());
    }

    #[test]
    fn reply_decoding_tolerates_partial_bodies() {
        let reply: V1AuthorizeReply =
            serde_json::from_value(serde_json::json!({"MaxUsage": 3600000000000i64})).unwrap();
        assert_eq!(reply.max_usage, Some(3_600_000_000_000));
        assert!(reply.attributes.is_none());
    }
}
