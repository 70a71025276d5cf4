pub mod engine;

pub use engine::BackfillEngine;
