pub mod chat;
pub mod config;
pub mod credentials;
pub mod documents;
pub mod health;
pub mod modes;
pub mod sessions;
pub mod ui;
