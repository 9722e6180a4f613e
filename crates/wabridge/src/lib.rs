//! wabridge: an HTTP bridge over a WhatsApp session.
//!
//! The session itself lives in a sidecar process ([`connector`]). wabridge keeps
//! track of its connection state and reconnects it ([`lifecycle`]), forwards
//! inbound messages to a webhook ([`webhook`]), and exposes a small REST API
//! ([`server`]).

pub mod api;
pub mod background;
pub mod client;
pub mod config;
pub mod connector;
pub mod handlers;
pub mod lifecycle;
pub mod qr;
pub mod server;
pub mod webhook;
