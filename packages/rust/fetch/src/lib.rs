//! Bounded-concurrency fetching of candidate source pages.
//!
//! Two pieces:
//! - [`FanOut`] — a generic bounded-concurrency executor with per-item
//!   timeouts and drop-don't-fail semantics
//! - [`PageFetcher`] — HTTP fetch plus HTML-to-text cleanup for one page

pub mod fanout;
pub mod page;

pub use fanout::{FanOut, FanOutOutcome};
pub use page::{FetchedSource, PageFetcher, is_fetchable};
