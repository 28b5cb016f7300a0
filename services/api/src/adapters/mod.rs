pub mod db;
pub mod question_llm;
pub mod rng;

pub use db::DbAdapter;
pub use question_llm::OpenAiQuestionAdapter;
pub use rng::SeededRandom;
