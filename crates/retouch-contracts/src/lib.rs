pub mod chat;
pub mod events;
pub mod history;
pub mod models;
pub mod requests;
pub mod session;
pub mod summary;
