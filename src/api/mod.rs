pub mod background;
pub mod chat;
pub(crate) mod common;
pub mod health;
