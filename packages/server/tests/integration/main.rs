mod common;

mod delivery;
