pub mod memory;
pub mod pool;
pub mod postgres;

pub use pool::create_pool;
