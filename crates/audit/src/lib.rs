//! `mg-audit` — the audit store gateway.
//!
//! Every tool invocation produces a begin/end record pair, every governance
//! decision a log entry, and every mounted upstream its metadata — all of
//! it flowing through [`AuditGateway`] into an [`store::AuditStore`]
//! backend (MongoDB in production, in-memory for tests and storeless runs).
//!
//! Two hard contracts live here:
//! - **Bounded serialization** ([`bounded`]): the store never receives an
//!   unbounded document.
//! - **Non-blocking writes** ([`queue`]): log writes are submitted to a
//!   bounded queue and drained in the background; a full queue drops the
//!   oldest pending write, and a failed write is logged and dropped —
//!   audit faults never fail a tool call.

pub mod bounded;
pub mod gateway;
pub mod memory;
pub mod mongo;
pub mod queue;
pub mod record;
pub mod store;

pub use gateway::{AuditGateway, ToolLogFilter};
pub use memory::MemoryAuditStore;
pub use mongo::MongoAuditStore;
pub use queue::{AuditQueue, AuditWrite};
pub use record::{CallStatus, EventType};
pub use store::{create_store, AuditStore, FindQuery};
