//! Collection -> chapter -> page -> image traversal.
//!
//! Every level fans out one task per child and joins them all before it
//! reports. A chapter owns a child cancellation token: the first real failure
//! among its pages cancels the rest of that chapter only, and sibling
//! chapters carry on.

use std::sync::Arc;

use folio_core::{
    ChapterOutcome, CrawlReport, Metadata, NamingError, NeverBlock, NodeState, Observer,
    Observers, Progression, Resource, Rule, SkipReason,
};
use folio_logging::{folio_debug, folio_error, folio_info, folio_warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::extract::{image_extension, ExtractError, Extractor, Target};
use crate::fetch::Fetcher;
use crate::persist::Saver;
use crate::CrawlError;

/// How the pages of a chapter beyond the first are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageMode {
    /// Fetch every page document and read its image from it.
    #[default]
    EachPage,
    /// Fetch one more page to calibrate, then predict the remaining image locations.
    Predict,
}

type PageTasks = JoinSet<Result<Metadata, CrawlError>>;

pub struct CrawlerBuilder {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    saver: Arc<dyn Saver>,
    rule: Arc<dyn Rule>,
    observers: Observers,
    mode: PageMode,
}

impl CrawlerBuilder {
    /// Extra skip rule, checked alongside the saver's own "already done" test.
    pub fn rule(mut self, rule: Arc<dyn Rule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn mode(mut self, mode: PageMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn subscribe(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.subscribe(observer);
        self
    }

    pub fn build(self) -> Crawler {
        Crawler {
            inner: Arc::new(Inner {
                fetcher: self.fetcher,
                extractor: self.extractor,
                saver: self.saver,
                rule: self.rule,
                observers: self.observers,
                mode: self.mode,
            }),
        }
    }
}

pub struct Crawler {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    saver: Arc<dyn Saver>,
    rule: Arc<dyn Rule>,
    observers: Observers,
    mode: PageMode,
}

impl Crawler {
    pub fn builder(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        saver: Arc<dyn Saver>,
    ) -> CrawlerBuilder {
        CrawlerBuilder {
            fetcher,
            extractor,
            saver,
            rule: Arc::new(NeverBlock),
            observers: Observers::new(),
            mode: PageMode::default(),
        }
    }

    /// Crawls one top-level input, a collection or a single chapter.
    ///
    /// Chapter failures are recorded in the report; only failures above the
    /// chapter level are returned as errors. Cancellation ends the run early
    /// without an error.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        url: &Url,
    ) -> Result<CrawlReport, CrawlError> {
        let inner = self.inner.clone();
        let target = inner.extractor.target(url)?;
        let result = match target {
            Target::Collection => inner.crawl_collection(cancel.clone(), url.clone()).await,
            Target::Chapter {
                collection,
                listing_path,
            } => {
                let chapter = inner
                    .resolve_chapter(cancel, url, &collection, &listing_path)
                    .await;
                match chapter {
                    Ok(chapter) => {
                        let outcome = inner.crawl_chapter(cancel.clone(), chapter).await;
                        Ok(CrawlReport {
                            chapters: vec![outcome],
                        })
                    }
                    Err(err) => Err(err),
                }
            }
        };

        match result {
            Err(err) if err.is_cancelled() => {
                folio_info!("crawl of {} cancelled", url);
                Ok(CrawlReport::default())
            }
            other => other,
        }
    }
}

impl Inner {
    fn blocked(&self, metadata: &Metadata) -> bool {
        self.saver.block(metadata) || self.rule.block(metadata)
    }

    async fn crawl_collection(
        self: Arc<Self>,
        cancel: CancellationToken,
        url: Url,
    ) -> Result<CrawlReport, CrawlError> {
        let doc = self.fetcher.get_document(&cancel, &url).await?;
        let chapters = self.extractor.chapters(&doc)?;
        folio_info!("{}: {} chapters listed", url, chapters.len());

        let mut tasks = JoinSet::new();
        for chapter in chapters {
            tasks.spawn(self.clone().crawl_chapter(cancel.clone(), chapter));
        }

        let mut report = CrawlReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.push(outcome),
                Err(err) => {
                    folio_error!("chapter task of {} aborted: {}", url, err);
                    report.push(ChapterOutcome::new(
                        url.as_str(),
                        NodeState::Failed(err.to_string()),
                    ));
                }
            }
        }
        Ok(report)
    }

    /// Adopts the collection's listing metadata for a chapter given directly.
    async fn resolve_chapter(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        collection: &Url,
        listing_path: &str,
    ) -> Result<Resource, CrawlError> {
        let doc = self.fetcher.get_document(cancel, collection).await?;
        let listed = self
            .extractor
            .chapters(&doc)?
            .into_iter()
            .find(|c| c.location.path().trim_end_matches('/') == listing_path)
            .ok_or_else(|| ExtractError::UnknownChapter(url.to_string()))?;
        Ok(Resource::new(url.clone(), listed.metadata))
    }

    async fn crawl_chapter(
        self: Arc<Self>,
        cancel: CancellationToken,
        chapter: Resource,
    ) -> ChapterOutcome {
        let label = chapter.metadata.label();
        let scope = cancel.child_token();
        let state = match self.chapter_pages(&scope, chapter).await {
            Ok(state) => state,
            Err(err) if err.is_cancelled() => NodeState::Skipped(SkipReason::Cancelled),
            Err(err) => {
                folio_error!("chapter {} failed: {}", label, err);
                NodeState::Failed(err.to_string())
            }
        };
        ChapterOutcome::new(label, state)
    }

    async fn chapter_pages(
        self: &Arc<Self>,
        scope: &CancellationToken,
        chapter: Resource,
    ) -> Result<NodeState, CrawlError> {
        // Whatever the listing told us may already be enough to skip.
        if self.blocked(&chapter.metadata) {
            folio_info!("skipping {}", chapter.metadata.label());
            return Ok(NodeState::Skipped(SkipReason::AlreadyDone));
        }

        let doc = self.fetcher.get_document(scope, &chapter.location).await?;
        let listing = self.extractor.pages(&doc)?;
        let mut resolved = listing
            .resolved
            .into_iter()
            .map(|image| image.merged(&chapter.metadata));
        let first = resolved
            .next()
            .ok_or_else(|| ExtractError::NoCurrentPage(doc.url.to_string()))?;
        let extra: Vec<Resource> = resolved.collect();
        let others: Vec<Resource> = listing
            .others
            .into_iter()
            .map(|page| page.merged(&chapter.metadata))
            .collect();

        if self.blocked(&first.metadata) {
            folio_info!("skipping {}", first.metadata.label());
            return Ok(NodeState::Skipped(SkipReason::AlreadyDone));
        }
        self.observers.on_chapter_start(&first.metadata);
        folio_debug!(
            "{}: {} pages",
            first.metadata.label(),
            1 + extra.len() + others.len()
        );

        let direct: Vec<Resource> = std::iter::once(first.clone()).chain(extra).collect();
        let mut pages = PageTasks::new();
        for image in direct.iter().cloned() {
            let this = self.clone();
            let scope = scope.clone();
            pages.spawn(async move { this.persist_resolved(&scope, image).await });
        }

        let mut failure = None;
        if let Err(err) = self.spawn_pages(scope, &first, others, &mut pages).await {
            scope.cancel();
            failure = Some(err);
        }

        let mut last = first.metadata.clone();
        while let Some(joined) = pages.join_next().await {
            match joined
                .map_err(|err| CrawlError::Task(err.to_string()))
                .and_then(|result| result)
            {
                Ok(metadata) => last = metadata,
                Err(err) => {
                    // Keep the first real failure; cancellations it triggers are noise.
                    let replace = match &failure {
                        None => true,
                        Some(prev) => prev.is_cancelled() && !err.is_cancelled(),
                    };
                    if replace {
                        scope.cancel();
                        failure = Some(err);
                    }
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        for image in &direct {
            self.observers.on_page_end(&image.metadata);
        }
        let artifact = self.saver.finalize_chapter(&last).await?;
        if let Some(leftover) = artifact.leftover {
            if let Err(err) = tokio::fs::remove_dir_all(&leftover).await {
                folio_warn!("cannot remove staging {}: {}", leftover.display(), err);
            }
        }
        self.observers.on_chapter_end(&last);
        Ok(NodeState::Done)
    }

    async fn spawn_pages(
        self: &Arc<Self>,
        scope: &CancellationToken,
        first: &Resource,
        mut others: Vec<Resource>,
        pages: &mut PageTasks,
    ) -> Result<(), CrawlError> {
        if self.mode == PageMode::EachPage {
            self.spawn_each(scope, others, pages);
            return Ok(());
        }

        // Single-page chapters have no second sample to calibrate from.
        let Some(last_page) = others.pop() else {
            return Ok(());
        };
        let sample = self.resolve_page(scope, last_page, true).await?;
        let progression = match Progression::calibrate(
            (page_index(first)?, &first.location),
            (page_index(&sample)?, &sample.location),
        ) {
            Ok(progression) => progression,
            Err(err) => {
                folio_warn!(
                    "{}: cannot predict images ({}), fetching every page",
                    first.metadata.label(),
                    err
                );
                self.spawn_each(scope, others, pages);
                return Ok(());
            }
        };
        let predicted: Result<Vec<(Resource, Url)>, CrawlError> = others
            .iter()
            .map(|page| -> Result<(Resource, Url), CrawlError> {
                let location = progression.location_for(page_index(page)?)?;
                Ok((page.clone(), location))
            })
            .collect();
        let predicted = match predicted {
            Ok(predicted) => predicted,
            Err(err) => {
                folio_warn!(
                    "{}: cannot predict images ({}), fetching every page",
                    first.metadata.label(),
                    err
                );
                self.spawn_each(scope, others, pages);
                return Ok(());
            }
        };
        folio_info!(
            "{}: start:{} delta:{}",
            first.metadata.label(),
            progression.start(),
            progression.delta()
        );

        for (page, location) in predicted {
            let this = self.clone();
            let scope = scope.clone();
            pages.spawn(async move { this.persist_predicted(&scope, page, location).await });
        }
        Ok(())
    }

    fn spawn_each(
        self: &Arc<Self>,
        scope: &CancellationToken,
        others: Vec<Resource>,
        pages: &mut PageTasks,
    ) {
        for page in others {
            let this = self.clone();
            let scope = scope.clone();
            pages.spawn(async move {
                this.resolve_page(&scope, page, true)
                    .await
                    .map(|image| image.metadata)
            });
        }
    }

    /// Page-end for directly resolved images is emitted by the chapter after the join.
    async fn persist_resolved(
        &self,
        scope: &CancellationToken,
        image: Resource,
    ) -> Result<Metadata, CrawlError> {
        self.observers.on_page_start(&image.metadata);
        self.persist_image(scope, &image).await?;
        self.saver.finalize_page(&image.metadata).await?;
        Ok(image.metadata)
    }

    /// Fetches a page document, reads its image and persists it.
    async fn resolve_page(
        &self,
        scope: &CancellationToken,
        page: Resource,
        announce: bool,
    ) -> Result<Resource, CrawlError> {
        if announce {
            self.observers.on_page_start(&page.metadata);
        }
        let doc = self.fetcher.get_document(scope, &page.location).await?;
        let image = self.extractor.image(&doc)?.merged(&page.metadata);
        self.persist_image(scope, &image).await?;
        self.saver.finalize_page(&image.metadata).await?;
        self.observers.on_page_end(&image.metadata);
        Ok(image)
    }

    async fn persist_predicted(
        &self,
        scope: &CancellationToken,
        page: Resource,
        predicted: Url,
    ) -> Result<Metadata, CrawlError> {
        let guess = Metadata {
            image_ext: Some(image_extension(&predicted)),
            ..Metadata::default()
        };
        let image = Resource::new(predicted, guess).merged(&page.metadata);
        self.observers.on_page_start(&image.metadata);

        match self.persist_image(scope, &image).await {
            Ok(_) => {
                self.saver.finalize_page(&image.metadata).await?;
                self.observers.on_page_end(&image.metadata);
                Ok(image.metadata)
            }
            Err(err) if err.is_not_found() => {
                folio_warn!(
                    "predicted {} is missing, fetching page {}",
                    image.location,
                    page.location
                );
                Ok(self.resolve_page(scope, page, false).await?.metadata)
            }
            Err(err) => Err(err),
        }
    }

    /// Streams one image into the saver. Returns the bytes written.
    async fn persist_image(
        &self,
        scope: &CancellationToken,
        image: &Resource,
    ) -> Result<u64, CrawlError> {
        let mut response = self.fetcher.get(scope, &image.location).await?;
        let mut sink = self
            .saver
            .save(&image.metadata, response.content_length())
            .await?;
        while let Some(chunk) = response.next_chunk(scope).await? {
            sink.write_chunk(&chunk).await?;
        }
        Ok(sink.finish().await?)
    }
}

fn page_index(resource: &Resource) -> Result<u32, NamingError> {
    resource.metadata.page.ok_or(NamingError::Missing("page"))
}

/// Logs chapter completions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_page_end(&self, metadata: &Metadata) {
        folio_debug!(
            "finished page {} of {}",
            metadata.page.unwrap_or_default(),
            metadata.label()
        );
    }

    fn on_chapter_end(&self, metadata: &Metadata) {
        folio_info!("finished chapter {}", metadata.label());
    }
}
