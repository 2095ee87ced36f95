//! # Chat Server Library
//!
//! Server side of the parley chat service: a single long-running process
//! hosts a dynamic population of named clients over TCP, relays unicast and
//! multicast messages, answers roster queries, and obeys one operator
//! command (`EXIT`) on its console.
//!
//! ## Architecture
//!
//! All mutable state is packaged in one [`network::Server`] value created at
//! startup; there are no globals. A single task drives a prioritized
//! `select!` loop over the operator console, the listener, and the funnel of
//! per-session reader tasks; because that task is the only writer of any
//! state, no synchronization primitives appear anywhere in the crate.
//!
//! ## Module Organization
//!
//! - [`registry`]: the universal name to entity-kind mapping; client and
//!   group names share one namespace.
//! - [`groups`]: group rosters in insertion order, eager purge on client
//!   departure, eager dissolution below two members.
//! - [`session`]: connected clients, each with its outbound stream half,
//!   reader task handle, and a session id guarding against name reuse races.
//! - [`network`]: the listener, the handshake, the event loop, the command
//!   handlers, and the operator console.
//!
//! The wire format itself (framing and the tag table) lives in the
//! `parley-shared` crate, which the interactive client uses too.

pub mod groups;
pub mod network;
pub mod registry;
pub mod session;
