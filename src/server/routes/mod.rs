pub mod catalogue;
pub mod classify;
pub mod health;
pub mod index;
