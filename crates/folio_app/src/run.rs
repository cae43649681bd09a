use std::sync::Arc;

use anyhow::Context;
use folio_core::{AnyRule, CrawlReport, LatestChapterRule, LinearGradient, NodeState};
use folio_engine::{
    ensure_output_dir, ChapterStore, Crawler, LogObserver, PageMode, ProgressHandle,
    ReqwestFetcher, SelectorExtractor,
};
use folio_logging::{folio_error, folio_info, folio_warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cli::Cli;
use crate::config::AppConfig;

/// Crawls every input concurrently. Returns whether every chapter succeeded.
pub async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    ensure_output_dir(&cli.output)
        .with_context(|| format!("cannot use output directory {}", cli.output.display()))?;

    let fetcher = ReqwestFetcher::new(config.fetch_settings()).context("invalid fetch settings")?;
    let extractor = SelectorExtractor::new(&config.selectors).context("invalid selectors")?;
    let progress = ProgressHandle::spawn(std::io::stdout(), LinearGradient::traffic_light());
    let store = ChapterStore::new(
        cli.output.clone(),
        config.layout(cli.archive),
        progress.clone(),
    );

    let mut rules = AnyRule::new();
    if cli.latest_only {
        rules = rules.with(LatestChapterRule);
    }
    let mode = if cli.predict {
        PageMode::Predict
    } else {
        PageMode::EachPage
    };
    let crawler = Arc::new(
        Crawler::builder(Arc::new(fetcher), Arc::new(extractor), Arc::new(store))
            .rule(Arc::new(rules))
            .mode(mode)
            .subscribe(Arc::new(LogObserver))
            .build(),
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            folio_warn!("interrupted, abandoning unfinished chapters");
            interrupt.cancel();
        }
    });

    let mut inputs = JoinSet::new();
    for url in cli.urls {
        let crawler = crawler.clone();
        let cancel = cancel.clone();
        inputs.spawn(async move {
            let result = crawler.run(&cancel, &url).await;
            (url, result)
        });
    }

    let mut lines = Vec::new();
    let mut success = true;
    while let Some(joined) = inputs.join_next().await {
        match joined {
            Ok((url, Ok(report))) => {
                success &= report.is_success();
                lines.extend(summarize(&url, &report));
            }
            Ok((url, Err(err))) => {
                folio_error!("{}: {}", url, err);
                lines.push(format!("{url}: {err}"));
                success = false;
            }
            Err(err) => {
                folio_error!("input task aborted: {}", err);
                success = false;
            }
        }
    }

    progress.shutdown().await;
    println!();
    for line in lines {
        println!("{line}");
    }
    Ok(success)
}

fn summarize(url: &Url, report: &CrawlReport) -> Vec<String> {
    folio_info!(
        "{}: {} done, {} skipped, {} failed",
        url,
        report.done(),
        report.skipped(),
        report.failed()
    );
    let mut lines = vec![format!(
        "{url}: {} done, {} skipped, {} failed",
        report.done(),
        report.skipped(),
        report.failed()
    )];
    for chapter in &report.chapters {
        if let NodeState::Failed(reason) = &chapter.state {
            lines.push(format!("  {}: {reason}", chapter.label));
        }
    }
    lines
}
