pub mod config;
pub mod extract;
pub mod fetcher;
pub mod limitless;
pub mod model;

pub use fetcher::DigestFetcher;
pub use limitless::{DigestApi, LimitlessClient};
pub use model::{DataRecord, DateKey, FetchState};
