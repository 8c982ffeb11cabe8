pub mod operations;
pub mod planner;
pub mod rows;
pub mod stats;
pub mod validator;
pub mod verifier;
pub mod vocabulary;
