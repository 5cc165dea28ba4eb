//! The five stage workers.
//!
//! Each stage consumes one named queue, performs one opaque transformation,
//! and emits zero or more follow-on jobs. They share the [`crate::worker`]
//! contract; only the transform differs.

mod cleaner;
mod combine;
mod convert;
mod split;
mod tagger;

pub use cleaner::CleanupStage;
pub use combine::CombineStage;
pub use convert::ConvertStage;
pub use split::SplitStage;
pub use tagger::ApplyMetadataStage;
