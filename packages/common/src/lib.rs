pub mod storage;
pub mod transfer;
