//! The request-processor pipeline.
//!
//! Processors run in configured order, first match wins unless `*continue`.
//! A matching processor maps the inbound packet into a charging event,
//! invokes exactly one session operation (plus an optional `ProcessCDR`
//! follow-up when `*cdrs` accompanies another action) and maps the reply
//! back onto the outbound attribute tree.

use super::radauth;
use super::request::{AgentRequest, TemplateRegistry};
use super::{
    AgentError, ERROR_FIELD, META_ACCOUNTS, META_ATTRIBUTES, META_AUTH, META_AUTHORIZE, META_CDRS,
    META_CONTINUE, META_DISPATCHERS, META_DRYRUN, META_EVENT, META_FD, META_INIT, META_INITIATE,
    META_LOG, META_MESSAGE, META_NONE, META_RADAUTH, META_RESOURCES, META_ROUTES,
    META_ROUTES_EVENT_COST, META_ROUTES_IGNORE_ERRORS, META_STATS, META_TERMINATE, META_THRESHOLDS,
    META_UPDATE, RADAUTH_FAILED, USAGE,
};
use crate::config::{Flags, RequestProcessorCfg};
use crate::filters;
use crate::nav::NavMap;
use crate::sessions::{
    extract_args, CgrEvent, CgrEventWithDispatcher, ExtractedArgs, SessionsFacade, V1AuthorizeArgs,
    V1InitSessionArgs, V1ProcessEventArgs, V1ProcessMessageArgs, V1TerminateSessionArgs,
    V1UpdateSessionArgs,
};
use radius_proto::dictionary::Dictionary;
use radius_proto::Packet;
use tracing::{info, warn};

/// The closed set of processor action kinds, in dispatch precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    DryRun,
    Authorize,
    Initiate,
    Update,
    Terminate,
    Message,
    Cdrs,
    Event,
    None,
    RadAuth,
}

const ACTION_PRECEDENCE: [(&str, ActionKind); 10] = [
    (META_DRYRUN, ActionKind::DryRun),
    (META_AUTHORIZE, ActionKind::Authorize),
    (META_INITIATE, ActionKind::Initiate),
    (META_UPDATE, ActionKind::Update),
    (META_TERMINATE, ActionKind::Terminate),
    (META_MESSAGE, ActionKind::Message),
    (META_CDRS, ActionKind::Cdrs),
    (META_EVENT, ActionKind::Event),
    (META_NONE, ActionKind::None),
    (META_RADAUTH, ActionKind::RadAuth),
];

impl ActionKind {
    /// The first matching action flag wins.
    pub fn from_flags(flags: &Flags) -> Option<Self> {
        ACTION_PRECEDENCE
            .iter()
            .find(|(token, _)| flags.has(token))
            .map(|(_, kind)| *kind)
    }
}

/// RADIUS-path context a processor may need: the decoded request, the reply
/// under construction and the client's shared secret.
pub struct RadiusCtx<'a> {
    pub request: &'a Packet,
    pub reply: &'a mut Packet,
    pub dictionary: &'a Dictionary,
    pub secret: &'a [u8],
}

/// The ordered processor chain plus its collaborators, shared across
/// protocols.
pub struct RequestPipeline {
    pub processors: Vec<RequestProcessorCfg>,
    pub templates: TemplateRegistry,
    pub sessions: SessionsFacade,
    pub default_tenant: String,
    pub default_timezone: String,
}

impl RequestPipeline {
    /// Walk the processor chain for one transaction. Returns whether any
    /// processor handled the request; `*vars`, `*cgrep`, `*rep` and `*opts`
    /// accumulate across processors while `*cgreq` is rebuilt for each.
    pub async fn handle(
        &self,
        areq: &mut AgentRequest,
        mut radius: Option<&mut RadiusCtx<'_>>,
    ) -> Result<bool, AgentError> {
        let mut processed = false;
        for processor in &self.processors {
            areq.cgr_request = NavMap::new();
            areq.tenant =
                areq.resolve_tenant(processor.tenant.as_deref(), &self.default_tenant)?;
            areq.timezone = processor
                .timezone
                .clone()
                .filter(|tz| !tz.is_empty())
                .unwrap_or_else(|| self.default_timezone.clone());
            let matched = self
                .process(processor, areq, radius.as_deref_mut())
                .await?;
            if matched {
                processed = true;
                if !processor.flags().has(META_CONTINUE) {
                    break;
                }
            }
        }
        Ok(processed)
    }

    /// Run a single processor; `Ok(false)` means its filters did not match.
    async fn process(
        &self,
        processor: &RequestProcessorCfg,
        areq: &mut AgentRequest,
        radius: Option<&mut RadiusCtx<'_>>,
    ) -> Result<bool, AgentError> {
        {
            let lookup = |path: &str| areq.field_as_string(path);
            if !filters::pass_all(&processor.filters, &lookup)? {
                return Ok(false);
            }
        }
        let flags = processor.flags();
        areq.set_fields(&processor.request_fields, &self.templates)?;

        let action = ActionKind::from_flags(&flags)
            .ok_or_else(|| AgentError::MissingActionFlag(processor.id.clone()))?;
        let mut cgr_event = CgrEvent::new(areq.tenant.clone(), areq.cgr_request.as_json());
        let opts = areq.opts.as_json();
        let needs_paginator = matches!(
            action,
            ActionKind::Authorize | ActionKind::Message | ActionKind::Event
        );
        let extracted = match extract_args(&opts, flags.has(META_DISPATCHERS), needs_paginator) {
            Ok(extracted) => extracted,
            Err(reason) => {
                warn!(processor_id = %processor.id, %reason, "args extraction failed");
                ExtractedArgs::default()
            }
        };

        if flags.has(META_LOG) {
            info!(
                processor_id = %processor.id,
                event = %serde_json::Value::Object(cgr_event.event.clone()),
                "LOG, inbound message"
            );
        }

        match action {
            ActionKind::None | ActionKind::Cdrs => {} // nothing before the CDR follow-up
            ActionKind::DryRun => {
                info!(
                    processor_id = %processor.id,
                    event = %serde_json::to_string(&cgr_event).unwrap_or_default(),
                    "DRY_RUN, charging event"
                );
            }
            ActionKind::Authorize => {
                let args = authorize_args(&flags, cgr_event.clone(), &extracted, opts.clone());
                match self.sessions.authorize_event(&args).await {
                    Ok(reply) => areq.set_cgr_reply(Some(&serde_json::to_value(&reply)?), None),
                    Err(err) => areq.set_cgr_reply(None, Some(err.to_string())),
                }
            }
            ActionKind::Initiate => {
                let args = init_args(&flags, cgr_event.clone(), &extracted, opts.clone());
                match self.sessions.initiate_session(&args).await {
                    Ok(reply) => areq.set_cgr_reply(Some(&serde_json::to_value(&reply)?), None),
                    Err(err) => areq.set_cgr_reply(None, Some(err.to_string())),
                }
            }
            ActionKind::Update => {
                let args = update_args(&flags, cgr_event.clone(), &extracted, opts.clone());
                match self.sessions.update_session(&args).await {
                    Ok(reply) => areq.set_cgr_reply(Some(&serde_json::to_value(&reply)?), None),
                    Err(err) => areq.set_cgr_reply(None, Some(err.to_string())),
                }
            }
            ActionKind::Terminate => {
                let args = terminate_args(&flags, cgr_event.clone(), &extracted, opts.clone());
                match self.sessions.terminate_session(&args).await {
                    Ok(_ack) => areq.set_cgr_reply(None, None),
                    Err(err) => areq.set_cgr_reply(None, Some(err.to_string())),
                }
            }
            ActionKind::Message => {
                let args = message_args(&flags, cgr_event.clone(), &extracted, opts.clone());
                match self.sessions.process_message(&args).await {
                    Ok(reply) => {
                        if args.debit {
                            // the CDR must reflect the debited usage
                            cgr_event.event.insert(
                                USAGE.to_string(),
                                serde_json::Value::from(reply.max_usage.unwrap_or_default()),
                            );
                        }
                        areq.set_cgr_reply(Some(&serde_json::to_value(&reply)?), None);
                    }
                    Err(err) => {
                        if crate::sessions::is_rals_error(&err) {
                            // avoid further debits
                            cgr_event
                                .event
                                .insert(USAGE.to_string(), serde_json::Value::from(0));
                        }
                        areq.set_cgr_reply(None, Some(err.to_string()));
                    }
                }
            }
            ActionKind::Event => {
                let args = V1ProcessEventArgs {
                    flags: flags.slice(),
                    cgr_event: cgr_event.clone(),
                    arg_dispatcher: extracted.dispatcher.clone(),
                };
                let needs_max_usage = flags.has(META_AUTH)
                    || flags.has(META_INIT)
                    || flags.has(META_UPDATE);
                match self.sessions.process_event(&args).await {
                    Ok(reply) => {
                        if needs_max_usage {
                            cgr_event.event.insert(
                                USAGE.to_string(),
                                serde_json::Value::from(reply.max_usage.unwrap_or_default()),
                            );
                        }
                        areq.set_cgr_reply(Some(&serde_json::to_value(&reply)?), None);
                    }
                    Err(err) => {
                        if crate::sessions::is_rals_error(&err) {
                            cgr_event
                                .event
                                .insert(USAGE.to_string(), serde_json::Value::from(0));
                        }
                        areq.set_cgr_reply(None, Some(err.to_string()));
                    }
                }
            }
            ActionKind::RadAuth => match radius {
                Some(ctx) => match radauth::radauth_request(areq, ctx) {
                    Ok(true) => {}
                    Ok(false) => areq.set_cgr_reply(None, Some(RADAUTH_FAILED.to_string())),
                    Err(err) => areq.set_cgr_reply(None, Some(err.to_string())),
                },
                None => {
                    areq.set_cgr_reply(None, Some(AgentError::RadAuthUnavailable.to_string()))
                }
            },
        }

        // a second call so terminate and event flows can still write CDRs
        if flags.has(META_CDRS) && action != ActionKind::DryRun {
            let args = CgrEventWithDispatcher {
                cgr_event: cgr_event.clone(),
                arg_dispatcher: extracted.dispatcher.clone(),
            };
            if let Err(err) = self.sessions.process_cdr(&args).await {
                areq.cgr_reply.set(
                    &crate::nav::parse_path(ERROR_FIELD),
                    crate::nav::NavValue::Text(err.to_string()),
                );
            }
        }

        areq.set_fields(&processor.reply_fields, &self.templates)?;

        if flags.has(META_LOG) {
            info!(
                processor_id = %processor.id,
                reply = %serde_json::Value::Object(areq.reply.as_json()),
                "LOG, composed reply"
            );
        }
        if action == ActionKind::DryRun {
            info!(
                processor_id = %processor.id,
                reply = %serde_json::Value::Object(areq.reply.as_json()),
                "DRY_RUN, composed reply"
            );
        }
        Ok(true)
    }
}

fn authorize_args(
    flags: &Flags,
    cgr_event: CgrEvent,
    extracted: &ExtractedArgs,
    opts: serde_json::Map<String, serde_json::Value>,
) -> V1AuthorizeArgs {
    V1AuthorizeArgs {
        get_attributes: flags.has(META_ATTRIBUTES),
        attribute_ids: flags.params(META_ATTRIBUTES),
        authorize_resources: flags.has(META_RESOURCES),
        get_max_usage: flags.has(META_ACCOUNTS),
        process_thresholds: flags.has(META_THRESHOLDS),
        threshold_ids: flags.params(META_THRESHOLDS),
        process_stats: flags.has(META_STATS),
        stat_ids: flags.params(META_STATS),
        get_routes: flags.has(META_ROUTES),
        routes_ignore_errors: flags.has(META_ROUTES_IGNORE_ERRORS),
        routes_max_cost: flags
            .has(META_ROUTES_EVENT_COST)
            .then(|| "*event_cost".to_string()),
        force_duration: flags.has(META_FD),
        cgr_event,
        arg_dispatcher: extracted.dispatcher.clone(),
        paginator: extracted.paginator.clone(),
        opts,
    }
}

fn init_args(
    flags: &Flags,
    cgr_event: CgrEvent,
    extracted: &ExtractedArgs,
    opts: serde_json::Map<String, serde_json::Value>,
) -> V1InitSessionArgs {
    V1InitSessionArgs {
        get_attributes: flags.has(META_ATTRIBUTES),
        attribute_ids: flags.params(META_ATTRIBUTES),
        allocate_resources: flags.has(META_RESOURCES),
        process_thresholds: flags.has(META_THRESHOLDS),
        threshold_ids: flags.params(META_THRESHOLDS),
        process_stats: flags.has(META_STATS),
        stat_ids: flags.params(META_STATS),
        init_session: flags.has(META_ACCOUNTS),
        force_duration: flags.has(META_FD),
        cgr_event,
        arg_dispatcher: extracted.dispatcher.clone(),
        opts,
    }
}

fn update_args(
    flags: &Flags,
    cgr_event: CgrEvent,
    extracted: &ExtractedArgs,
    opts: serde_json::Map<String, serde_json::Value>,
) -> V1UpdateSessionArgs {
    V1UpdateSessionArgs {
        get_attributes: flags.has(META_ATTRIBUTES),
        attribute_ids: flags.params(META_ATTRIBUTES),
        update_session: flags.has(META_ACCOUNTS),
        force_duration: flags.has(META_FD),
        cgr_event,
        arg_dispatcher: extracted.dispatcher.clone(),
        opts,
    }
}

fn terminate_args(
    flags: &Flags,
    cgr_event: CgrEvent,
    extracted: &ExtractedArgs,
    opts: serde_json::Map<String, serde_json::Value>,
) -> V1TerminateSessionArgs {
    V1TerminateSessionArgs {
        terminate_session: flags.has(META_ACCOUNTS),
        release_resources: flags.has(META_RESOURCES),
        process_thresholds: flags.has(META_THRESHOLDS),
        threshold_ids: flags.params(META_THRESHOLDS),
        process_stats: flags.has(META_STATS),
        stat_ids: flags.params(META_STATS),
        force_duration: flags.has(META_FD),
        cgr_event,
        arg_dispatcher: extracted.dispatcher.clone(),
        opts,
    }
}

fn message_args(
    flags: &Flags,
    cgr_event: CgrEvent,
    extracted: &ExtractedArgs,
    opts: serde_json::Map<String, serde_json::Value>,
) -> V1ProcessMessageArgs {
    V1ProcessMessageArgs {
        get_attributes: flags.has(META_ATTRIBUTES),
        attribute_ids: flags.params(META_ATTRIBUTES),
        allocate_resources: flags.has(META_RESOURCES),
        debit: flags.has(META_ACCOUNTS),
        process_thresholds: flags.has(META_THRESHOLDS),
        threshold_ids: flags.params(META_THRESHOLDS),
        process_stats: flags.has(META_STATS),
        stat_ids: flags.params(META_STATS),
        get_routes: flags.has(META_ROUTES),
        routes_ignore_errors: flags.has(META_ROUTES_IGNORE_ERRORS),
        routes_max_cost: flags
            .has(META_ROUTES_EVENT_COST)
            .then(|| "*event_cost".to_string()),
        force_duration: flags.has(META_FD),
        cgr_event,
        arg_dispatcher: extracted.dispatcher.clone(),
        paginator: extracted.paginator.clone(),
        opts,
    }
}
