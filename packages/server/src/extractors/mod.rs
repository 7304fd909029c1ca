pub mod auth;
pub mod delivery_form;
pub mod json;
