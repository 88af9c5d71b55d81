pub mod aggregator;
pub mod display;
pub mod event;
pub mod lifecycle;
pub mod model;

// Re-export common types
pub use aggregator::{fold, Inconsistency, Verdict};
pub use event::{classify, InboundEvent, ProgressSnapshot, TaskEvent};
pub use lifecycle::{classify_transition, Transition};
pub use model::{AIAnalysis, BestOption, PriceRange, SearchResult, TaskId, TaskProgress, TaskStatus};
