pub mod admin;
pub mod auth;
pub mod delivery;
pub mod reference;
