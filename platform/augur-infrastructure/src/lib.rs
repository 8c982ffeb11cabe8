pub mod collaborators;
pub mod events;
pub mod persistence;
