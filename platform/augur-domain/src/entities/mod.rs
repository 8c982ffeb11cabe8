pub mod attempt;
pub mod operation;
pub mod query;
pub mod result;
pub mod step;
pub mod validation;
