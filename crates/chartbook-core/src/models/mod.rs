//! Data models for Chartbook

mod conflict;
mod entity;
mod outbox;
mod section_note;
mod song;
mod sync_state;
mod version;

pub use conflict::{ConflictId, ConflictRemote, SyncConflict};
pub use entity::EntityType;
pub use outbox::{OutboxItem, OutboxItemId, OutboxOp, OutboxStatus};
pub use section_note::{SectionNote, SectionNoteId};
pub use song::{Song, SongId};
pub use sync_state::SyncState;
pub use version::{SongVersion, VersionId};
