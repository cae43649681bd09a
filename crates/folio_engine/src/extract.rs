use folio_core::{Metadata, ReadingDirection, Resource};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use url::Url;

use crate::Document;

const DEFAULT_IMAGE_EXT: &str = "jpg";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid selector `{0}`")]
    BadSelector(String),
    #[error("cannot handle {0}")]
    UnsupportedUrl(String),
    #[error("no collection name in {0}")]
    NoCollectionName(String),
    #[error("no chapters listed in {0}")]
    NoChapters(String),
    #[error("chapter row {0} has no single link")]
    NoChapterLink(usize),
    #[error("chapter row `{0}` carries no chapter number")]
    NoChapterNumber(String),
    #[error("page option {0} has no link")]
    NoPageLink(usize),
    #[error("no page is marked as current in {0}")]
    NoCurrentPage(String),
    #[error("no image in {0}")]
    NoImage(String),
    #[error("invalid link `{link}`: {reason}")]
    BadLink { link: String, reason: String },
    #[error("chapter {0} is not listed in its collection")]
    UnknownChapter(String),
}

/// What a top-level input points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Collection,
    /// A chapter (or one of its pages). `listing_path` is how the collection lists it.
    Chapter { collection: Url, listing_path: String },
}

/// Pages of a chapter: those still to fetch, and those already resolved to an image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageListing {
    pub others: Vec<Resource>,
    pub resolved: Vec<Resource>,
}

/// Per-source document parsing. Implementations must not touch the network.
pub trait Extractor: Send + Sync {
    fn target(&self, url: &Url) -> Result<Target, ExtractError>;
    fn chapters(&self, doc: &Document) -> Result<Vec<Resource>, ExtractError>;
    fn pages(&self, doc: &Document) -> Result<PageListing, ExtractError>;
    fn image(&self, doc: &Document) -> Result<Resource, ExtractError>;
}

/// CSS selectors describing a listing-site layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    pub collection_name: String,
    /// Two-cell rows: a `Label:` cell followed by its value.
    pub property_rows: String,
    pub genres: String,
    pub description: String,
    pub cover_image: String,
    /// One row per chapter: a cell with the link, then a cell with the date.
    pub chapter_rows: String,
    pub page_options: String,
    pub image: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            collection_name: ".aname".to_string(),
            property_rows: "#mangaproperties tr".to_string(),
            genres: ".genretags".to_string(),
            description: "#readmangasum p".to_string(),
            cover_image: "#mangaimg img".to_string(),
            chapter_rows: "#listing tr".to_string(),
            page_options: "#pageMenu option".to_string(),
            image: "#img".to_string(),
        }
    }
}

struct Compiled {
    collection_name: Selector,
    property_rows: Selector,
    genres: Selector,
    description: Selector,
    cover_image: Selector,
    chapter_rows: Selector,
    page_options: Selector,
    image: Selector,
    cell: Selector,
    link: Selector,
}

fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|_| ExtractError::BadSelector(selector.to_string()))
}

/// Extractor for sites laid out as collection listing -> chapter page menu -> page image.
pub struct SelectorExtractor {
    selectors: Compiled,
}

impl SelectorExtractor {
    pub fn new(set: &SelectorSet) -> Result<Self, ExtractError> {
        Ok(Self {
            selectors: Compiled {
                collection_name: compile(&set.collection_name)?,
                property_rows: compile(&set.property_rows)?,
                genres: compile(&set.genres)?,
                description: compile(&set.description)?,
                cover_image: compile(&set.cover_image)?,
                chapter_rows: compile(&set.chapter_rows)?,
                page_options: compile(&set.page_options)?,
                image: compile(&set.image)?,
                cell: compile("td")?,
                link: compile("a[href]")?,
            },
        })
    }

    fn collection_metadata(&self, html: &Html, doc: &Document) -> Result<Metadata, ExtractError> {
        let s = &self.selectors;
        let name = first_text(html, &s.collection_name)
            .ok_or_else(|| ExtractError::NoCollectionName(doc.url.to_string()))?;

        let mut meta = Metadata {
            collection: Some(name),
            description: first_text(html, &s.description),
            cover_image: html
                .select(&s.cover_image)
                .next()
                .and_then(|img| img.value().attr("src"))
                .map(str::to_string),
            ..Metadata::default()
        };

        let genres: Vec<String> = html.select(&s.genres).map(text_of).collect();
        if !genres.is_empty() {
            meta.genres = Some(genres);
        }

        for row in html.select(&s.property_rows) {
            let cells: Vec<String> = row.select(&s.cell).map(text_of).collect();
            let [label, value, ..] = cells.as_slice() else {
                continue;
            };
            let value = Some(value.clone()).filter(|v| !v.is_empty());
            match label.trim_end_matches(':').trim().to_ascii_lowercase().as_str() {
                "author" => meta.author = value,
                "artist" => meta.artist = value,
                "status" => meta.status = value,
                "reading direction" => {
                    meta.reading_direction =
                        Some(ReadingDirection::from_label(value.as_deref().unwrap_or("")));
                }
                _ => {}
            }
        }
        // Listing sites that say nothing read left to right.
        meta.reading_direction.get_or_insert(ReadingDirection::Ltr);
        Ok(meta)
    }
}

impl Extractor for SelectorExtractor {
    fn target(&self, url: &Url) -> Result<Target, ExtractError> {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            [_] => Ok(Target::Collection),
            [collection, chapter] | [collection, chapter, _] => {
                let collection_url = url
                    .join(&format!("/{collection}"))
                    .map_err(|err| bad_link(collection, err))?;
                Ok(Target::Chapter {
                    collection: collection_url,
                    listing_path: format!("/{collection}/{chapter}"),
                })
            }
            _ => Err(ExtractError::UnsupportedUrl(url.to_string())),
        }
    }

    fn chapters(&self, doc: &Document) -> Result<Vec<Resource>, ExtractError> {
        let html = Html::parse_document(&doc.html);
        let mut collection = self.collection_metadata(&html, doc)?;
        let name = collection.collection.clone().unwrap_or_default();
        let number_re = Regex::new(&format!(r"{} (?P<num>\d+) : (?P<name>.*)", regex::escape(&name)))
            .map_err(|_| ExtractError::NoCollectionName(doc.url.to_string()))?;

        let rows: Vec<Vec<ElementRef>> = html
            .select(&self.selectors.chapter_rows)
            .map(|row| row.select(&self.selectors.cell).collect::<Vec<_>>())
            .filter(|cells| !cells.is_empty())
            .collect();
        if rows.is_empty() {
            return Err(ExtractError::NoChapters(doc.url.to_string()));
        }
        collection.chapters = Some(rows.len() as u32);

        let mut chapters = Vec::with_capacity(rows.len());
        for (i, cells) in rows.iter().enumerate() {
            let cell = cells[0];
            let links: Vec<ElementRef> = cell.select(&self.selectors.link).collect();
            let [link] = links.as_slice() else {
                return Err(ExtractError::NoChapterLink(i + 1));
            };
            let href = link.value().attr("href").unwrap_or_default();

            let text = text_of(cell);
            let captures = number_re
                .captures(&text)
                .ok_or_else(|| ExtractError::NoChapterNumber(text.clone()))?;
            let number = captures["num"]
                .parse::<u32>()
                .map_err(|_| ExtractError::NoChapterNumber(text.clone()))?;

            let chapter = Metadata {
                chapter_index: Some(i as u32 + 1),
                chapter: Some(number),
                chapter_name: Some(captures["name"].trim().to_string()).filter(|n| !n.is_empty()),
                date: cells.get(1).map(|c| text_of(*c)).filter(|d| !d.is_empty()),
                ..Metadata::default()
            };
            let location = doc.url.join(href).map_err(|err| bad_link(href, err))?;
            chapters.push(Resource::new(location, chapter.merged(&collection)));
        }
        Ok(chapters)
    }

    fn pages(&self, doc: &Document) -> Result<PageListing, ExtractError> {
        let html = Html::parse_document(&doc.html);
        let options: Vec<ElementRef> = html.select(&self.selectors.page_options).collect();
        let total = options.len() as u32;

        let mut listing = PageListing::default();
        for (i, option) in options.iter().enumerate() {
            let value = option
                .value()
                .attr("value")
                .ok_or(ExtractError::NoPageLink(i + 1))?;
            let page = Metadata {
                pages: Some(total),
                page: Some(i as u32 + 1),
                ..Metadata::default()
            };
            if option.value().attr("selected").is_some() {
                listing.resolved.push(self.image_in(&html, doc)?.merged(&page));
            } else {
                let location = doc.url.join(value).map_err(|err| bad_link(value, err))?;
                listing.others.push(Resource::new(location, page));
            }
        }

        if listing.resolved.is_empty() {
            return Err(ExtractError::NoCurrentPage(doc.url.to_string()));
        }
        Ok(listing)
    }

    fn image(&self, doc: &Document) -> Result<Resource, ExtractError> {
        let html = Html::parse_document(&doc.html);
        self.image_in(&html, doc)
    }
}

impl SelectorExtractor {
    fn image_in(&self, html: &Html, doc: &Document) -> Result<Resource, ExtractError> {
        let src = html
            .select(&self.selectors.image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .ok_or_else(|| ExtractError::NoImage(doc.url.to_string()))?;
        let location = doc.url.join(src).map_err(|err| bad_link(src, err))?;
        let meta = Metadata {
            image_ext: Some(image_extension(&location)),
            ..Metadata::default()
        };
        Ok(Resource::new(location, meta))
    }
}

/// Lowercased extension of the last path segment, `jpg` when there is no sensible one.
pub fn image_extension(location: &Url) -> String {
    location
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_IMAGE_EXT.to_string())
}

fn text_of(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(html: &Html, selector: &Selector) -> Option<String> {
    html.select(selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn bad_link(link: &str, err: url::ParseError) -> ExtractError {
    ExtractError::BadLink {
        link: link.to_string(),
        reason: err.to_string(),
    }
}
