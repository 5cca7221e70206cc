//! 看板之外的领域实体，直接使用通用 [`EntityStore`](crate::sync::EntityStore)

pub mod note;
pub mod tag;

pub use note::{Note, NoteDraft, NotePatch};
pub use tag::{Tag, TagDraft, TagPatch};
