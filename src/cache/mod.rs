mod image_cache;
mod query_cache;

pub use image_cache::ImageCache;
pub use query_cache::{CardResult, QueryCache, QueryMeta};
