mod common;

use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;

use common::{Journal, Route, ScriptedDownloader, TestSpider, fast_config, init_tracing};
use spider_dispatch::prelude::*;
use spider_dispatch::response::FLAG_DOWNLOAD_STOPPED;

const BODY_LEN: usize = 40;
const CHUNK: usize = 10;

fn downloader() -> ScriptedDownloader {
    ScriptedDownloader::new().route("/big", Route::bytes(BODY_LEN, CHUNK))
}

fn handlers() -> Handlers {
    Handlers::new()
        .callback("parse", |response: Response| -> CallbackResult {
            json!({
                "from": "parse",
                "len": response.body.len(),
                "stopped": response.has_flag(FLAG_DOWNLOAD_STOPPED),
            })
            .into()
        })
        .errback("on_error", |failure: Failure| -> CallbackResult {
            json!({
                "from": "errback",
                "len": failure.partial_body().map(|b| b.len()),
                "stopped": failure.error.is_download_stopped(),
            })
            .into()
        })
}

fn big_request(with_errback: bool) -> TestSpider {
    TestSpider::new(move || {
        let request = Request::get("http://site.test/big").unwrap();
        if with_errback {
            request.with_errback("on_error").into()
        } else {
            request.into()
        }
    })
    .handlers(handlers())
}

#[tokio::test]
async fn soft_stop_hands_partial_body_to_callback() {
    init_tracing();
    let journal = Journal::new();
    let summary = CrawlerBuilder::new(big_request(true))
        .with_config(fast_config())
        .downloader(downloader())
        .add_bytes_received_hook(|_: &Bytes, _: &Request| ControlSignal::StopSoft)
        .add_item_sink(Arc::clone(&journal))
        .error_sink(Arc::clone(&journal))
        .build()
        .unwrap()
        .start_crawl()
        .await
        .unwrap();

    assert_eq!(
        journal.items(),
        vec![json!({"from": "parse", "len": CHUNK, "stopped": true})]
    );
    assert!(journal.faults().is_empty());
    assert_eq!(summary.stats.downloads_stopped_soft.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hard_stop_goes_to_errback_with_partial_body() {
    init_tracing();
    let journal = Journal::new();
    let summary = CrawlerBuilder::new(big_request(true))
        .with_config(fast_config())
        .downloader(downloader())
        .add_bytes_received_hook(|_: &Bytes, _: &Request| {
            ControlSignal::StopHard("not interested".into())
        })
        .add_item_sink(Arc::clone(&journal))
        .error_sink(Arc::clone(&journal))
        .build()
        .unwrap()
        .start_crawl()
        .await
        .unwrap();

    assert_eq!(
        journal.items(),
        vec![json!({"from": "errback", "len": CHUNK, "stopped": true})]
    );
    assert!(journal.faults().is_empty());
    assert_eq!(summary.stats.downloads_stopped_hard.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hard_stop_without_errback_is_reported() {
    init_tracing();
    let journal = Journal::new();
    CrawlerBuilder::new(big_request(false))
        .with_config(fast_config())
        .downloader(downloader())
        .add_bytes_received_hook(|_: &Bytes, _: &Request| {
            ControlSignal::StopHard("not interested".into())
        })
        .add_item_sink(Arc::clone(&journal))
        .error_sink(Arc::clone(&journal))
        .build()
        .unwrap()
        .start_crawl()
        .await
        .unwrap();

    assert!(journal.items().is_empty());
    let faults = journal.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].error().is_download_stopped());
    assert_eq!(faults[0].body_len(), Some(CHUNK));
}

#[tokio::test]
async fn hook_that_continues_leaves_download_untouched() {
    init_tracing();
    let journal = Journal::new();
    CrawlerBuilder::new(big_request(true))
        .with_config(fast_config())
        .downloader(downloader())
        .add_bytes_received_hook(|_: &Bytes, _: &Request| ControlSignal::Continue)
        .add_item_sink(Arc::clone(&journal))
        .build()
        .unwrap()
        .start_crawl()
        .await
        .unwrap();

    assert_eq!(
        journal.items(),
        vec![json!({"from": "parse", "len": BODY_LEN, "stopped": false})]
    );
}

#[tokio::test]
async fn oversized_download_is_hard_stopped() {
    init_tracing();
    let journal = Journal::new();
    CrawlerBuilder::new(big_request(true))
        .with_config(fast_config())
        .max_download_size(25)
        .downloader(downloader())
        .add_item_sink(Arc::clone(&journal))
        .build()
        .unwrap()
        .start_crawl()
        .await
        .unwrap();

    assert_eq!(
        journal.items(),
        vec![json!({"from": "errback", "len": 30, "stopped": true})]
    );
}

#[tokio::test]
async fn stop_only_affects_its_own_fetch() {
    init_tracing();
    let journal = Journal::new();
    let spider = TestSpider::seeds(&["http://site.test/big", "http://site.test/other"])
        .handlers(handlers());
    // `/other` is still downloading when `/big` is stopped.
    let downloader = ScriptedDownloader::new()
        .route("/big", Route::bytes(BODY_LEN, CHUNK))
        .route(
            "/other",
            Route::bytes(BODY_LEN, CHUNK).delayed(std::time::Duration::from_millis(50)),
        );

    let summary = CrawlerBuilder::new(spider)
        .with_config(fast_config())
        .downloader(downloader)
        .add_bytes_received_hook(|_: &Bytes, request: &Request| {
            if request.url().path() == "/big" {
                ControlSignal::StopHard("not interested".into())
            } else {
                ControlSignal::Continue
            }
        })
        .add_item_sink(Arc::clone(&journal))
        .error_sink(Arc::clone(&journal))
        .build()
        .unwrap()
        .start_crawl()
        .await
        .unwrap();

    assert_eq!(summary.reason, CloseReason::Finished);
    assert_eq!(
        journal.items(),
        vec![json!({"from": "parse", "len": BODY_LEN, "stopped": false})]
    );
    let faults = journal.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].error().is_download_stopped());
    assert_eq!(summary.stats.downloads_stopped_hard.load(Ordering::SeqCst), 1);
}
