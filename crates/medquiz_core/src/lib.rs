pub mod domain;
pub mod ports;

pub use domain::{
    BufferedQuestion, CachedQuestion, Difficulty, QuestionPayload, QuestionSource, ReviewQuestion,
    SeenContext, ServedQuestion, TopicStats,
};
pub use ports::{
    BufferStore, ChunkUsageStore, ContentSource, PortError, PortResult, QuestionGenerationService,
    QuestionStore, RandomSource, StatsStore,
};
