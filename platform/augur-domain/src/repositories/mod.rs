pub mod collaborator;
pub mod events;
pub mod row_store;
