//! Folio engine: fetching, progress rendering, persistence and the crawl itself.
mod crawl;
mod decode;
mod extract;
mod fetch;
mod persist;
mod progress;
mod types;

pub use crawl::{Crawler, CrawlerBuilder, LogObserver, PageMode};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use extract::{
    image_extension, ExtractError, Extractor, PageListing, SelectorExtractor, SelectorSet, Target,
};
pub use fetch::{
    FetchResponse, FetchSettings, Fetcher, HostRule, ReqwestFetcher, SettingsError, CATCH_ALL,
};
pub use persist::{ensure_output_dir, ChapterArtifact, ChapterStore, PageSink, PersistError, Saver};
pub use progress::{progress_color, render_cell, ProgressHandle, UNTRACKED_LANE};
pub use types::{CrawlError, Document, FailureKind, FetchError, Lane, Progress};
