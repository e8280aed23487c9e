pub mod debounce;
pub mod dedup;
pub mod dispatcher;
pub mod macros;
pub mod pipeline;
pub mod segment;

pub use debounce::{BatchHandler, Debouncer, Enqueued, FlushedBatch, MergedInput};
pub use dedup::DedupCache;
pub use dispatcher::{DeliveryReport, Dispatcher};
pub use macros::{MacroDirective, MacroEngine};
pub use pipeline::{IngestOutcome, Pipeline, PipelineStats, TurnOutcome, TurnStage, WebReply};
pub use segment::{present, segment, Presented};
