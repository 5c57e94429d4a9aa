//! The content-ingestion pipeline this core's producers and handlers
//! exist to drive: feed sources -> raw items -> processed content ->
//! daily analysis -> predictions -> comparisons. Everything the
//! pipeline touches outside a job row (feed fetching, content
//! processing, transcription, analysis, prediction, and the domain
//! store itself) is an external collaborator - this module defines
//! those interfaces and the seven built-in handlers that call them,
//! plus one in-memory test double per trait.

pub mod handlers;
pub mod memory_store;
pub mod model;
pub mod test_doubles;
pub mod traits;

pub use handlers::{
    register_all, CleanupHandler, CleanupPolicy, ContentProcessHandler, DailyAnalysisHandler, FeedFetchHandler,
    GeneratePredictionsHandler, PipelineContext, PodcastTranscriptionHandler, PredictionCompareHandler,
};
pub use memory_store::MemoryContentStore;
pub use model::*;
pub use test_doubles::{FakeAnalyzer, FakeContentProcessor, FakeFeedAdapter, FakePredictor, FakeTranscriber};
pub use traits::{Analyzer, ContentProcessor, ContentStore, FeedAdapter, Predictor, Transcriber};
