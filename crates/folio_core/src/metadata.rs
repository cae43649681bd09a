use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingDirection {
    Ltr,
    Rtl,
}

impl ReadingDirection {
    /// Listing sites spell the direction out; anything but right-to-left reads left-to-right.
    pub fn from_label(label: &str) -> Self {
        if label.trim().eq_ignore_ascii_case("right to left") {
            ReadingDirection::Rtl
        } else {
            ReadingDirection::Ltr
        }
    }
}

/// Attributes carried down the collection -> chapter -> page -> image tree.
///
/// Every field is optional: each level of the crawl only knows part of the
/// picture and fills in its own slice before handing the record down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub collection: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub status: Option<String>,
    pub reading_direction: Option<ReadingDirection>,
    pub genres: Option<Vec<String>>,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub chapters: Option<u32>,
    pub chapter_index: Option<u32>,
    pub chapter: Option<u32>,
    pub chapter_name: Option<String>,
    pub date: Option<String>,
    pub pages: Option<u32>,
    pub page: Option<u32>,
    pub image_ext: Option<String>,
}

macro_rules! overwrite_set_fields {
    ($target:ident, $source:ident; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$source.$field {
                $target.$field = Some(value.clone());
            }
        )+
    };
}

impl Metadata {
    /// Right-biased shallow merge: fields set in `other` win, unset ones leave `self` alone.
    pub fn merge(&mut self, other: &Metadata) {
        overwrite_set_fields!(self, other;
            collection,
            author,
            artist,
            status,
            reading_direction,
            genres,
            description,
            cover_image,
            chapters,
            chapter_index,
            chapter,
            chapter_name,
            date,
            pages,
            page,
            image_ext,
        );
    }

    pub fn merged(mut self, other: &Metadata) -> Self {
        self.merge(other);
        self
    }

    /// Short human label for log lines, e.g. `Some Title@12`.
    pub fn label(&self) -> String {
        let name = self.collection.as_deref().unwrap_or("?");
        match (self.chapter, self.chapter_index) {
            (Some(number), _) => format!("{name}@{number}"),
            (None, Some(index)) => format!("{name}#{index}"),
            (None, None) => name.to_string(),
        }
    }
}

/// One crawlable unit: where to fetch it from and what is known about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub location: Url,
    pub metadata: Metadata,
}

impl Resource {
    pub fn new(location: Url, metadata: Metadata) -> Self {
        Self { location, metadata }
    }

    pub fn bare(location: Url) -> Self {
        Self::new(location, Metadata::default())
    }

    pub fn merged(mut self, other: &Metadata) -> Self {
        self.metadata.merge(other);
        self
    }
}
