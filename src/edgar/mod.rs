pub mod client;
pub mod parsing;
pub mod rate_limiter;
pub mod watcher;

pub use client::{AnnualValue, CompanyFacts, EdgarClient, FilingReference};
pub use rate_limiter::RateLimiter;
pub use watcher::{FilingEvent, FilingWatcher};
