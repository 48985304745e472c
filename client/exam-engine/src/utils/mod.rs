pub mod retry;
pub mod storage_key;
