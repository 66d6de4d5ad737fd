pub mod advice;
pub mod evaluator;
