pub mod delivery;
pub mod delivery_file;
pub mod delivery_status;
pub mod packaging_type;
pub mod role;
pub mod role_permission;
pub mod service_type;
pub mod tech_state;
pub mod transport_model;
pub mod user;
