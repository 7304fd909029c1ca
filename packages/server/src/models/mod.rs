pub mod attachment;
pub mod auth;
pub mod delivery;
pub mod reference;
pub mod shared;
