//! Record persistence: identity, lifecycle hooks, and get/save/delete against
//! the configured storage backend.

pub mod hooks;
pub mod record;

pub use hooks::{Hook, HookKind, HookRegistry, RecordOptions};
pub use record::{
    ID_LENGTH, Record, RecordService, Session, SessionOptions, base_attributes, generate_id,
};
