//! `mg-gateway` — the proxy itself.
//!
//! Wires the validated plan into running machinery: the config loader,
//! the mount engine (one governed mount per upstream, with the policy +
//! audit interceptor around every forwarded call), the front-end servers,
//! and the lifecycle supervisor.

pub mod api;
pub mod bootstrap;
pub mod loader;
pub mod mount;
pub mod server;
pub mod state;
pub mod supervisor;
