//! Image location prediction for chapters whose image ids grow by a fixed step.
//!
//! Sources of this kind serve `.../<name>-<id>.<ext>` where `id` increases
//! monotonically with the page index, with a constant (but not unit) step
//! inside a chapter. Two known samples are enough to derive every other page.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictError {
    #[error("cannot extract an image id from {0}")]
    NoImageId(String),
    #[error("calibration samples share page {0}")]
    SamePage(u32),
    #[error("predicted location is not a valid url: {0}")]
    InvalidLocation(String),
    #[error("image id for page {0} is out of range")]
    Overflow(u32),
}

fn image_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<prefix>.*)-(?P<number>\d+)\.(?P<suffix>.*)$")
            .expect("valid image name regex")
    })
}

/// An image location split into `<prefix>-<number>.<suffix>` around its last path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageId {
    base: Url,
    prefix: String,
    number: i64,
    suffix: String,
}

impl ImageId {
    pub fn parse(location: &Url) -> Result<Self, PredictError> {
        let basename = location
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        let captures = image_name_re()
            .captures(basename)
            .ok_or_else(|| PredictError::NoImageId(location.to_string()))?;
        let number = captures["number"]
            .parse::<i64>()
            .map_err(|_| PredictError::NoImageId(location.to_string()))?;
        Ok(Self {
            base: location.clone(),
            prefix: captures["prefix"].to_string(),
            number,
            suffix: captures["suffix"].to_string(),
        })
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn extension(&self) -> Option<&str> {
        self.suffix
            .rsplit('.')
            .next()
            .filter(|ext| !ext.is_empty())
    }

    /// Same directory, prefix and suffix, with `number` substituted.
    pub fn with_number(&self, number: i64) -> Result<Url, PredictError> {
        let relative = format!("./{}-{number}.{}", self.prefix, self.suffix);
        self.base
            .join(&relative)
            .map_err(|_| PredictError::InvalidLocation(relative))
    }
}

/// `id(page) = start + delta * page`, derived from two calibration samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progression {
    delta: i64,
    start: i64,
    template: ImageId,
}

impl Progression {
    /// Samples are `(page index, image location)` and may come in either order.
    pub fn calibrate(a: (u32, &Url), b: (u32, &Url)) -> Result<Self, PredictError> {
        let (low, high) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        if low.0 == high.0 {
            return Err(PredictError::SamePage(low.0));
        }
        let low_id = ImageId::parse(low.1)?;
        let high_id = ImageId::parse(high.1)?;
        Self::from_ids((low.0, low_id), (high.0, high_id.number))
    }

    fn from_ids(low: (u32, ImageId), high: (u32, i64)) -> Result<Self, PredictError> {
        let (low_page, template) = low;
        let (high_page, high_number) = high;
        let delta = high_number
            .checked_sub(template.number)
            .ok_or(PredictError::Overflow(high_page))?
            / (i64::from(high_page) - i64::from(low_page));
        let start = i64::from(low_page)
            .checked_mul(delta)
            .and_then(|offset| template.number.checked_sub(offset))
            .ok_or(PredictError::Overflow(low_page))?;
        Ok(Self {
            delta,
            start,
            template,
        })
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn id_for(&self, page: u32) -> Result<i64, PredictError> {
        self.delta
            .checked_mul(i64::from(page))
            .and_then(|offset| self.start.checked_add(offset))
            .ok_or(PredictError::Overflow(page))
    }

    pub fn location_for(&self, page: u32) -> Result<Url, PredictError> {
        self.template.with_number(self.id_for(page)?)
    }

    pub fn extension(&self) -> Option<&str> {
        self.template.extension()
    }
}
