//! AAA Charging Agent
//!
//! A front-end that terminates RADIUS (authentication + accounting) and maps
//! each inbound packet onto a session/charging service through a
//! declarative, filter-ordered request-processor pipeline, then synthesises
//! a protocol-compliant reply from the RPC outcome. The pipeline is
//! protocol-agnostic: any payload exposed through a
//! [`agent::dp::DataProvider`] (including a credit-control-shaped event map)
//! runs through the same processors.
//!
//! The crate also hosts the tariff-plan loader: a locked, multi-file,
//! row-correlated CSV ingestion pipeline materialising domain profiles into
//! the data manager and issuing cache-coherence calls.

pub mod agent;
pub mod config;
pub mod dm;
pub mod filters;
pub mod loader;
pub mod nav;
pub mod rpc;
pub mod rsr;
pub mod sessions;

pub use agent::processor::{ActionKind, RadiusCtx, RequestPipeline};
pub use agent::radius::RadiusAgent;
pub use agent::request::AgentRequest;
pub use agent::AgentError;
pub use config::{Config, ConfigError};
pub use loader::{Caching, LoadOption, Loader, LoaderError};
