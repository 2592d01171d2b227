pub mod backends;
pub mod cache;
pub mod kernels;
pub mod persistence;
pub mod server;
pub mod tools;
