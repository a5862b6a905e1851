//! Session persistence for trellis.
//!
//! The store is the runtime's single source of truth: users, sessions and
//! their message windows, tool-call and opened-file audit records, and
//! summarization logs all live behind the [`SessionStore`] capability
//! trait. The bundled [`MemoryStore`] keeps everything in memory with an
//! optional JSON snapshot file.

pub mod entities;
pub mod memory;
pub mod store;

pub use entities::{
    MessageRecord, OpenedFileRecord, Session, SummarizationLog, SummarizationStatus,
    SummarizationType, ToolCallRecord, User,
};
pub use memory::MemoryStore;
pub use store::{SessionRewrite, SessionStore};
