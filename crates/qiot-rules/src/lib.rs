//! Broker rule compilation and synchronisation.
//!
//! - [`compiler`] turns measurement sources into InfluxDB actions and rules
//! - [`broker`] defines the management API seam and its payloads
//! - [`emqx`] implements that API over the EMQX v5 REST interface
//! - [`reconciler`] upserts compiled routes and reports per-route results

pub mod broker;
pub mod compiler;
pub mod emqx;
pub mod reconciler;

pub use broker::{ActionPayload, BrokerApi, CreateOutcome, RemoteAction, RulePayload};
pub use compiler::{compile, compile_source, ActionDescriptor, CompiledRoute, NamingPolicy, RuleDescriptor};
pub use emqx::EmqxClient;
pub use reconciler::{
    plan, ActionSnapshot, ActionStep, CancelFlag, PlannedRoute, Reconciler, RouteOutcome,
    RouteStatus, RuleStep, SyncReport, SyncStage,
};
