//! Folio core: resource model, naming, and the pure arithmetic behind the crawl.
mod gradient;
mod metadata;
mod naming;
mod observer;
mod palette;
mod predict;
mod report;
mod rule;

pub use gradient::{LinearGradient, Rgb};
pub use metadata::{Metadata, ReadingDirection, Resource};
pub use naming::{
    chapter_paths, digits, leaf_name, padded, sanitize_component, ChapterPaths, Layout, LeafName,
    NamingError, PART_SUFFIX,
};
pub use observer::{Observer, Observers};
pub use palette::{xterm_index, NEUTRAL_COLOR};
pub use predict::{ImageId, PredictError, Progression};
pub use report::{ChapterOutcome, CrawlReport, NodeState, SkipReason};
pub use rule::{AnyRule, LatestChapterRule, NeverBlock, Rule};
