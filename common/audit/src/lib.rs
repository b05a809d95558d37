pub mod model;
pub mod writer;

pub use model::{
    AuditModule, AuditQuery, AuditRecord, AuditStats, ModuleCount, API_KEY_ACTOR,
    DEFAULT_RETENTION_DAYS, SYSTEM_ACTOR,
};
pub use writer::AuditWriter;
