pub mod catalog;
pub mod fallback;
pub mod reorder;
pub mod resolver;

pub use catalog::{CatalogInfo, InMemoryCatalog, MessageProvider, MessageTemplate};
pub use resolver::{
    Attempt, AttemptReason, DiagnosticsLevel, FallbackInfo, Fit, FinalMessage, MessageResolution,
    MessageResolver, MessageSource, MessageStrategy, ResolutionStatus, ResolveOptions, Selection,
};
