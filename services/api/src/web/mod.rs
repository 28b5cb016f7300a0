pub mod rest;
pub mod state;

// Re-export the handlers so the binary that builds the router can reach
// them directly.
pub use rest::{
    record_answer_handler, review_question_handler, study_question_handler, sweep_handler,
};
