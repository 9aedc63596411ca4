//! Pairing Controller (PC) Service Library
//!
//! Core of Switchboard - a random-pairing voice-chat signaling service.
//! Anonymous clients connect over WebSocket, request a partner, get
//! matched FIFO out of a shared queue, and relay SDP/ICE payloads through
//! the server until either side leaves or disconnects. The media plane is
//! never touched: the server is a rendezvous point and a relay for small
//! control messages.
//!
//! # Architecture
//!
//! ```text
//! Gateway (axum /ws)
//! ├── accepts connections, assigns ClientIds, pumps frames
//! └── SessionActor (one per connection)
//!     ├── owns the Idle/Queued/Paired state machine
//!     ├── calls the Matcher for queue and room operations
//!     └── reaches its peer through the Router
//!
//! Matcher ── SharedStore (Redis) ── queue:waiting, room:*, stats:global
//!        └── AnalyticsRecorder (Postgres, fire-and-forget)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per connection**: session state is mutated from a single
//!   task, so no controller-internal locking exists.
//! - **Store-level atomicity**: the queue's guarded enqueue and
//!   remove-by-user run as Lua scripts; racing pair attempts are resolved
//!   by the atomic pop.
//! - **Bounded outbound queues**: 64 frames per connection; ICE candidates
//!   are dropped on overflow, anything critical forces a disconnect.
//! - **Fire-and-forget analytics**: a failing audit store never blocks or
//!   fails a signaling operation.
//!
//! # Modules
//!
//! - [`config`] - service configuration from environment
//! - [`protocol`] - wire events (JSON, adjacently tagged)
//! - [`store`] - shared-store adapter (Redis + in-memory)
//! - [`matcher`] - FIFO queue and room registry
//! - [`session`] - per-connection state machine and actor
//! - [`router`] - client → session registry
//! - [`gateway`] - WebSocket/HTTP surface
//! - [`analytics`] - durable room-lifecycle audit
//! - [`observability`] - probes

#![warn(clippy::pedantic)]

pub mod analytics;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod matcher;
pub mod observability;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
