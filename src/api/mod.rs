pub mod chat;
pub mod chat_adapter;
pub mod health;
pub mod models;
