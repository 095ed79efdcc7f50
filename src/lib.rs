//! # Overture
//!
//! Event-driven workflow orchestrator for long-running, multi-step projects.
//! Work arrives as typed events on a durable stream; the orchestrator turns
//! requests into a backlog of tasks, dispatches them to worker agents, gates
//! completions behind per-agent definition-of-done validators, and routes
//! anything ambiguous into a human clarification loop.
//!
//! ## Modules
//!
//! - `backend` - Narrow async interface over the KV/set/hash/stream backend,
//!   with Redis and in-memory implementations
//! - `config` - Runtime settings with environment-variable overrides
//! - `dod` - Definition-of-done registry and outcome evaluation
//! - `event` - Event envelope wire type and the event-type catalog
//! - `facts` - Fact extraction and the append-only fact ledger
//! - `orchestrator` - Backlog lifecycle, clarification protocol, dispatch
//! - `phase` - Hard-timeout phase execution and the phased agent manager
//! - `runtime` - Reliable stream processor: dedup, retry, reclaim, DLQ
//! - `schema` - JSON-schema registry for envelopes and event payloads
//! - `state_machine` - Backlog status transitions
//! - `store` - Typed stores for backlog items, questions, projects, orders
//! - `worker` - Worker template and the built-in work processors

pub mod backend;
pub mod cli;
pub mod config;
pub mod dod;
pub mod event;
pub mod facts;
pub mod failures;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod runtime;
pub mod schema;
pub mod state_machine;
pub mod store;
pub mod trace;
pub mod worker;
