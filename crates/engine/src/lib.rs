pub mod birthday;
pub mod cache;
pub mod memory_store;
pub mod password_reset;
pub mod redis_store;
pub mod repository;
pub mod scheduler;
pub mod template;
pub mod ticket;
