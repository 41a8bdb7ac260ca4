//! The fixed two-stage event pipeline: enhance, then clean.

pub mod cleaner;
pub mod enhancer;
pub mod types;

pub use cleaner::{CleanerPipeline, CleanerRules};
pub use enhancer::EnhancerPipeline;
pub use types::{
    ChannelId, CleanOutcome, EnhanceOutcome, EventKind, EventReport, MessageEvent,
};
