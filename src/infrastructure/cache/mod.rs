mod completion_cache;

pub use completion_cache::*;
