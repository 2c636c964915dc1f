mod dashmap_counter_store;
mod http_ocr_upstream;
mod redis_counter_store;

pub use dashmap_counter_store::DashMapCounterStore;
pub use http_ocr_upstream::HttpOcrUpstream;
pub use redis_counter_store::RedisCounterStore;
