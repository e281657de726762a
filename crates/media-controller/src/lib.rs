//! Media Controller Library
//!
//! Control-plane core for a media server: clients create media objects
//! (pipelines, endpoints, hubs, filters) inside an engine, operate on them,
//! subscribe to their events and let the controller reclaim them when no
//! session holds them any more.
//!
//! # Architecture
//!
//! ```text
//! transport (JSON over HTTP)
//!   └── Core::process ── RequestCache (retries)
//!         ├── AdmissionController ── ResourceProbe
//!         ├── TypeRegistry ── ElementFactory / MediaElement (engine)
//!         ├── Registry (object tree)
//!         ├── SessionTable ── GarbageCollector
//!         └── EventDispatcher ── EventHandler (per transport)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Reference counting per session**: an object lives while at least one
//!   session holds a reference to it or to one of its descendants
//! - **Lock order**: registry before session table; neither lock is held
//!   across an engine call or an `.await`
//! - **Exactly-once delivery**: one handler per `(session, object, event,
//!   transport key)` regardless of how many times a client subscribes
//!
//! # Modules
//!
//! - [`core`] - The shared handle and its session/event entry points
//! - [`processor`] - Request execution, retries and transactions
//! - [`registry`] - The object tree
//! - [`session`] - Sessions, references and garbage collection
//! - [`events`] - Subscriptions and handler deduplication
//! - [`admission`] - Resource-based construction refusal
//! - [`engine`] - The engine seam and the in-memory loopback engine

pub mod admission;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod processor;
pub mod registry;
pub mod session;
pub mod system_info;
pub mod tasks;
pub mod transport;
