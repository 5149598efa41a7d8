//! Pipeline integration tests: credit-control-shaped events driven through
//! the processor chain against a recording mock session service.

use async_trait::async_trait;
use charge_agent::agent::dp::MapDataProvider;
use charge_agent::agent::processor::RequestPipeline;
use charge_agent::agent::request::AgentRequest;
use charge_agent::config::{FieldTemplateCfg, RequestProcessorCfg};
use charge_agent::rpc::{RpcClient, RpcError};
use charge_agent::sessions::SessionsFacade;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Records every call and answers from a canned per-method table.
struct MockRpc {
    calls: Mutex<Vec<(String, Value)>>,
    replies: HashMap<String, Result<Value, String>>,
}

impl MockRpc {
    fn new(replies: &[(&str, Result<Value, String>)]) -> Arc<Self> {
        Arc::new(MockRpc {
            calls: Mutex::new(Vec::new()),
            replies: replies
                .iter()
                .map(|(method, reply)| (method.to_string(), reply.clone()))
                .collect(),
        })
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        match self.replies.get(method) {
            Some(Ok(reply)) => Ok(reply.clone()),
            Some(Err(message)) => Err(RpcError::Remote(message.clone())),
            None => Ok(json!("OK")),
        }
    }
}

fn field(path: &str, field_type: &str, value: &str) -> FieldTemplateCfg {
    FieldTemplateCfg {
        tag: None,
        path: path.to_string(),
        field_type: field_type.to_string(),
        value: value.to_string(),
        mandatory: false,
        blocker: false,
        filters: Vec::new(),
    }
}

fn pipeline(rpc: Arc<MockRpc>, processors: Vec<RequestProcessorCfg>) -> RequestPipeline {
    RequestPipeline {
        processors,
        templates: HashMap::new(),
        sessions: SessionsFacade::new(rpc),
        default_tenant: "example.org".to_string(),
        default_timezone: "UTC".to_string(),
    }
}

fn request_for(event: Value) -> AgentRequest {
    AgentRequest::new(
        Arc::new(MapDataProvider::new(event)),
        Some("127.0.0.1:53212".to_string()),
        "example.org",
        "UTC",
    )
}

fn voice_init_processor() -> RequestProcessorCfg {
    let mut account = field(
        "*cgreq.Account",
        "*variable",
        "~*req.Subscription-Id.Subscription-Id-Data",
    );
    account.mandatory = true;
    let mut unlimited = field("*rep.Granted-Service-Unit.CC-Time", "*constant", "10");
    unlimited.blocker = true;
    unlimited.filters = vec!["*eq:~*cgrep.MaxUsage:-1".to_string()];
    RequestProcessorCfg {
        id: "VoiceInit".to_string(),
        filters: vec![
            "*string:~*req.CC-Request-Type:1".to_string(),
            "*string:~*req.Service-Context-Id:voice".to_string(),
        ],
        flags: vec![
            "*authorize".to_string(),
            "*accounts".to_string(),
            "*attributes".to_string(),
        ],
        tenant: None,
        timezone: None,
        request_fields: vec![
            field("*cgreq.ToR", "*constant", "*voice"),
            field("*cgreq.RequestType", "*constant", "*prepaid"),
            account,
        ],
        reply_fields: vec![
            unlimited,
            field(
                "*rep.Granted-Service-Unit.CC-Time",
                "*variable",
                "~*cgrep.MaxUsage{*duration_seconds}",
            ),
        ],
    }
}

fn voice_ccr() -> Value {
    json!({
        "CC-Request-Type": 1,
        "Service-Context-Id": "voice",
        "Subscription-Id": {"Subscription-Id-Data": "1001"},
    })
}

// Voice-Init: AuthorizeEvent carries the mapped event, the granted quota
// maps back onto Granted-Service-Unit.CC-Time in seconds.
#[tokio::test]
async fn voice_init_authorize() {
    let rpc = MockRpc::new(&[(
        "SessionSv1.AuthorizeEvent",
        Ok(json!({"MaxUsage": 3_600_000_000_000i64})),
    )]);
    let pipeline = pipeline(Arc::clone(&rpc), vec![voice_init_processor()]);
    let mut areq = request_for(voice_ccr());

    assert!(pipeline.handle(&mut areq, None).await.unwrap());

    let calls = rpc.calls();
    assert_eq!(calls.len(), 1, "exactly one action RPC per matched processor");
    let (method, params) = &calls[0];
    assert_eq!(method, "SessionSv1.AuthorizeEvent");
    assert_eq!(params["GetMaxUsage"], json!(true));
    assert_eq!(params["GetAttributes"], json!(true));
    assert_eq!(params["CGREvent"]["Tenant"], "example.org");
    assert_eq!(params["CGREvent"]["Event"]["ToR"], "*voice");
    assert_eq!(params["CGREvent"]["Event"]["RequestType"], "*prepaid");
    assert_eq!(params["CGREvent"]["Event"]["Account"], "1001");

    assert_eq!(
        areq.field_as_string("*rep.Granted-Service-Unit.CC-Time")
            .as_deref(),
        Some("3600")
    );
    assert_eq!(areq.field_as_string("*cgrep.Error").as_deref(), Some(""));
}

// Unlimited quota (-1) takes the blocker branch: CC-Time=10 and the
// remaining reply fields are truncated.
#[tokio::test]
async fn voice_init_unlimited_usage_takes_blocker() {
    let rpc = MockRpc::new(&[("SessionSv1.AuthorizeEvent", Ok(json!({"MaxUsage": -1})))]);
    let pipeline = pipeline(Arc::clone(&rpc), vec![voice_init_processor()]);
    let mut areq = request_for(voice_ccr());

    assert!(pipeline.handle(&mut areq, None).await.unwrap());
    assert_eq!(
        areq.field_as_string("*rep.Granted-Service-Unit.CC-Time")
            .as_deref(),
        Some("10")
    );
}

// Voice-Terminate without SIP-Response-Timestamp: Usage falls back to the
// constant 0s and ProcessCDR follows TerminateSession.
#[tokio::test]
async fn voice_terminate_with_cdr_followup() {
    let rpc = MockRpc::new(&[
        ("SessionSv1.TerminateSession", Ok(json!("OK"))),
        ("SessionSv1.ProcessCDR", Ok(json!("OK"))),
    ]);
    let mut usage_diff = field(
        "*cgreq.Usage",
        "*usage_difference",
        "~*req.SIP-Response-Timestamp;~*req.Event-Timestamp",
    );
    usage_diff.tag = Some("Usage".to_string());
    let mut usage_default = field("*cgreq.Usage", "*constant", "0s");
    usage_default.filters = vec!["*notexists:~*cgreq.Usage:".to_string()];
    let processor = RequestProcessorCfg {
        id: "VoiceTerminate".to_string(),
        filters: vec!["*string:~*req.CC-Request-Type:3".to_string()],
        flags: vec![
            "*terminate".to_string(),
            "*accounts".to_string(),
            "*cdrs".to_string(),
        ],
        tenant: None,
        timezone: None,
        request_fields: vec![
            field("*cgreq.ToR", "*constant", "*voice"),
            usage_diff,
            usage_default,
        ],
        reply_fields: Vec::new(),
    };
    let pipeline = pipeline(Arc::clone(&rpc), vec![processor]);
    let mut areq = request_for(json!({
        "CC-Request-Type": 3,
        "Event-Timestamp": "2018-01-07T17:00:01Z",
    }));

    assert!(pipeline.handle(&mut areq, None).await.unwrap());

    let calls = rpc.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "SessionSv1.TerminateSession");
    assert_eq!(calls[0].1["TerminateSession"], json!(true));
    assert_eq!(calls[1].0, "SessionSv1.ProcessCDR");
    assert_eq!(calls[1].1["CGREvent"]["Event"]["Usage"], "0s");
    assert_eq!(areq.field_as_string("*cgreq.Usage").as_deref(), Some("0s"));
}

// A packet matching no processor yields no reply and no RPC.
#[tokio::test]
async fn no_matching_processor_yields_nothing() {
    let rpc = MockRpc::new(&[]);
    let pipeline = pipeline(Arc::clone(&rpc), vec![voice_init_processor()]);
    let mut areq = request_for(json!({"CC-Request-Type": 2}));

    assert!(!pipeline.handle(&mut areq, None).await.unwrap());
    assert!(rpc.calls().is_empty());
    assert!(areq.reply.is_empty());
}

// Only *continue lets a second matching processor run.
#[tokio::test]
async fn continue_flag_chains_processors() {
    let attributes_processor = |with_continue: bool| {
        let mut flags = vec!["*event".to_string(), "*attributes".to_string()];
        if with_continue {
            flags.push("*continue".to_string());
        }
        RequestProcessorCfg {
            id: "First".to_string(),
            filters: Vec::new(),
            flags,
            tenant: None,
            timezone: None,
            request_fields: Vec::new(),
            reply_fields: Vec::new(),
        }
    };
    let second = RequestProcessorCfg {
        id: "Second".to_string(),
        filters: Vec::new(),
        flags: vec!["*message".to_string()],
        tenant: None,
        timezone: None,
        request_fields: Vec::new(),
        reply_fields: Vec::new(),
    };

    let replies: &[(&str, Result<Value, String>)] = &[
        ("SessionSv1.ProcessEvent", Ok(json!({"MaxUsage": 0}))),
        ("SessionSv1.ProcessMessage", Ok(json!({"MaxUsage": 0}))),
    ];
    let rpc = MockRpc::new(replies);
    let chain = pipeline(
        Arc::clone(&rpc),
        vec![attributes_processor(false), second.clone()],
    );
    let mut areq = request_for(json!({}));
    assert!(chain.handle(&mut areq, None).await.unwrap());
    assert_eq!(rpc.calls().len(), 1, "first match stops the walk");

    let rpc = MockRpc::new(replies);
    let chain = pipeline(
        Arc::clone(&rpc),
        vec![attributes_processor(true), second],
    );
    let mut areq = request_for(json!({}));
    assert!(chain.handle(&mut areq, None).await.unwrap());
    let calls = rpc.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "SessionSv1.ProcessEvent");
    assert_eq!(calls[1].0, "SessionSv1.ProcessMessage");
}

// Transport errors land in *cgrep.Error and reply fields still run.
#[tokio::test]
async fn rpc_error_is_recorded_and_reply_fields_run() {
    let rpc = MockRpc::new(&[(
        "SessionSv1.AuthorizeEvent",
        Err("NOT_CONNECTED".to_string()),
    )]);
    let mut processor = voice_init_processor();
    processor.reply_fields = vec![{
        let mut reject = field("*rep.Result", "*constant", "failed");
        reject.filters = vec!["*notempty:~*cgrep.Error:".to_string()];
        reject
    }];
    let pipeline = pipeline(Arc::clone(&rpc), vec![processor]);
    let mut areq = request_for(voice_ccr());

    assert!(pipeline.handle(&mut areq, None).await.unwrap());
    assert_eq!(
        areq.field_as_string("*cgrep.Error").as_deref(),
        Some("NOT_CONNECTED")
    );
    assert_eq!(areq.field_as_string("*rep.Result").as_deref(), Some("failed"));
}

// A RALS-prefixed error on *message zeroes the usage fed to the CDR.
#[tokio::test]
async fn rals_error_zeroes_usage_for_cdr() {
    let rpc = MockRpc::new(&[
        (
            "SessionSv1.ProcessMessage",
            Err("RALS_ERROR:INSUFFICIENT_CREDIT".to_string()),
        ),
        ("SessionSv1.ProcessCDR", Ok(json!("OK"))),
    ]);
    let processor = RequestProcessorCfg {
        id: "Msg".to_string(),
        filters: Vec::new(),
        flags: vec![
            "*message".to_string(),
            "*accounts".to_string(),
            "*cdrs".to_string(),
        ],
        tenant: None,
        timezone: None,
        request_fields: vec![field("*cgreq.Usage", "*constant", "60000000000")],
        reply_fields: Vec::new(),
    };
    let pipeline = pipeline(Arc::clone(&rpc), vec![processor]);
    let mut areq = request_for(json!({}));

    assert!(pipeline.handle(&mut areq, None).await.unwrap());
    let calls = rpc.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, "SessionSv1.ProcessCDR");
    assert_eq!(calls[1].1["CGREvent"]["Event"]["Usage"], json!(0));
}

// *dryrun never reaches the session service, not even for *cdrs.
#[tokio::test]
async fn dryrun_issues_no_rpc() {
    let rpc = MockRpc::new(&[]);
    let processor = RequestProcessorCfg {
        id: "Dry".to_string(),
        filters: Vec::new(),
        flags: vec!["*dryrun".to_string(), "*cdrs".to_string()],
        tenant: None,
        timezone: None,
        request_fields: vec![field("*cgreq.ToR", "*constant", "*voice")],
        reply_fields: Vec::new(),
    };
    let pipeline = pipeline(Arc::clone(&rpc), vec![processor]);
    let mut areq = request_for(json!({}));

    assert!(pipeline.handle(&mut areq, None).await.unwrap());
    assert!(rpc.calls().is_empty());
}

// Reply fields are inserted in configured order.
#[tokio::test]
async fn reply_field_order_matches_configuration() {
    let rpc = MockRpc::new(&[]);
    let processor = RequestProcessorCfg {
        id: "Ordered".to_string(),
        filters: Vec::new(),
        flags: vec!["*none".to_string()],
        tenant: None,
        timezone: None,
        request_fields: Vec::new(),
        reply_fields: vec![
            field("*rep.Third", "*constant", "3"),
            field("*rep.First", "*constant", "1"),
            field("*rep.Second", "*constant", "2"),
        ],
    };
    let pipeline = pipeline(Arc::clone(&rpc), vec![processor]);
    let mut areq = request_for(json!({}));

    assert!(pipeline.handle(&mut areq, None).await.unwrap());
    let order: Vec<String> = areq
        .reply
        .ordered_fields()
        .into_iter()
        .map(|(path, _)| path)
        .collect();
    assert_eq!(order, vec!["Third", "First", "Second"]);
    assert!(rpc.calls().is_empty());
}

// The processor tenant expression overrides the default tenant.
#[tokio::test]
async fn tenant_expression_resolves_from_request() {
    let rpc = MockRpc::new(&[("SessionSv1.AuthorizeEvent", Ok(json!({"MaxUsage": 0})))]);
    let mut processor = voice_init_processor();
    processor.tenant = Some("~*req.Origin-Realm".to_string());
    let pipeline = pipeline(Arc::clone(&rpc), vec![processor]);
    let mut event = voice_ccr();
    event["Origin-Realm"] = json!("tenant.two");
    let mut areq = request_for(event);

    assert!(pipeline.handle(&mut areq, None).await.unwrap());
    assert_eq!(rpc.calls()[0].1["CGREvent"]["Tenant"], "tenant.two");
}
