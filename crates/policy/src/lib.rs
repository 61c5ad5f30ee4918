//! `mg-policy` — per-call governance decisions.
//!
//! The [`PolicyEngine`] evaluates one [`PolicyDecision`] per tool call:
//! time window, sliding-window rate limit, blocked-pattern scan, and the
//! extra high-security checks, short-circuiting on the first denial. An
//! internal panic during evaluation fails closed (deny).
//!
//! Time is injected through the [`Clock`] trait so tests are deterministic;
//! production uses the wall clock.

pub mod clock;
pub mod engine;
pub mod rate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineStatus, PolicyDecision, PolicyEngine, Violation};
pub use rate::RateLimiter;
