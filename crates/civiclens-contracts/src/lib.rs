pub mod chat;
pub mod events;
pub mod grounding;
pub mod issue;
pub mod models;
pub mod schema;
