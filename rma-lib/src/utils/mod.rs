pub mod hex;
pub mod obj_pool;
