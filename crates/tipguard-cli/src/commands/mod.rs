pub mod field;
pub mod keys;
pub mod misc;
pub mod sealing;
pub mod vault;
