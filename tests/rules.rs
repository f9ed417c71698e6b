mod common;

use pretty_assertions::assert_eq;
use serde_json::Value;

use common::{Journal, Route, ScriptedDownloader, TestSpider, fast_config, init_tracing};
use spider_dispatch::prelude::*;
use spider_dispatch::rules::META_LINK_TEXT;

fn status_links(codes: &[u16]) -> String {
    let links: String = codes
        .iter()
        .map(|c| format!(r#"<a href="/status?n={c}">{c}</a>"#))
        .collect();
    format!("<html><body>{links}</body></html>")
}

/// POSTs `body` to the echo endpoint so the seed page lists those links.
fn payload_spider(body: String) -> TestSpider {
    TestSpider::new(move || {
        Request::build("http://site.test/alpayload", "POST")
            .unwrap()
            .with_body(body.clone())
            .into()
    })
}

/// Records the response and asks for `/status?n=202` with a keyword argument.
fn parse(response: Response) -> CallbackResult {
    let record = json!({
        "callback": "parse",
        "status": response.status.as_u16(),
        "foo": response.cb_kwargs().get("foo").cloned(),
    });
    let next = response
        .follow("/status?n=202")
        .map(|r| r.with_callback("parse").with_cb_kwarg("foo", "bar"));
    match next {
        Ok(next) => vec![Output::item(record), Output::from(next)].into(),
        Err(e) => CallbackResult::fault(e),
    }
}

fn errback(failure: Failure) -> CallbackResult {
    json!({
        "callback": "errback",
        "status": failure.response.as_ref().map(|r| r.status.as_u16()),
    })
    .into()
}

async fn crawl(spider: TestSpider, downloader: ScriptedDownloader) -> Arc<Journal> {
    init_tracing();
    let journal = Journal::new();
    CrawlerBuilder::new(spider)
        .with_config(fast_config())
        .downloader(downloader)
        .add_item_sink(Arc::clone(&journal))
        .error_sink(Arc::clone(&journal))
        .build()
        .unwrap()
        .start_crawl()
        .await
        .unwrap();
    journal
}

fn sorted_records(journal: &Journal, callback: &str) -> Vec<Value> {
    let mut records: Vec<Value> = journal
        .items()
        .into_iter()
        .filter(|item| item["callback"] == callback)
        .collect();
    records.sort_by_key(|item| item["status"].as_u64());
    records
}

#[tokio::test]
async fn rule_bound_parse_method() {
    let spider = payload_spider(status_links(&[200, 201]))
        .handlers(Handlers::new().callback("parse", parse))
        .rules(vec![
            Rule::new(HtmlLinkExtractor::new())
                .callback("parse")
                .follow(true),
        ]);
    let downloader = ScriptedDownloader::new().route("/alpayload", Route::Echo);
    let fetched = downloader.fetch_log();

    let journal = crawl(spider, downloader).await;

    assert_eq!(
        sorted_records(&journal, "parse"),
        vec![
            json!({"callback": "parse", "status": 200, "foo": null}),
            json!({"callback": "parse", "status": 201, "foo": null}),
            json!({"callback": "parse", "status": 202, "foo": "bar"}),
        ]
    );
    assert!(journal.faults().is_empty());
    // Seed, two rule links, and a single fetch of the de-duplicated 202.
    assert_eq!(fetched.lock().len(), 4);
}

#[tokio::test]
async fn rule_bound_errback() {
    let spider = payload_spider(status_links(&[200, 201, 404, 500, 501]))
        .handlers(
            Handlers::new()
                .callback("parse", parse)
                .errback("errback", errback),
        )
        .rules(vec![
            Rule::new(HtmlLinkExtractor::new())
                .callback("parse")
                .errback("errback")
                .follow(true),
        ]);
    let downloader = ScriptedDownloader::new().route("/alpayload", Route::Echo);

    let journal = crawl(spider, downloader).await;

    let statuses = |callback: &str| -> Vec<u64> {
        sorted_records(&journal, callback)
            .iter()
            .filter_map(|r| r["status"].as_u64())
            .collect()
    };
    assert_eq!(statuses("parse"), vec![200, 201, 202]);
    assert_eq!(statuses("errback"), vec![404, 500, 501]);
    assert!(journal.faults().is_empty());
}

#[tokio::test]
async fn seed_pages_go_to_parse_start_url_and_are_scanned() {
    let spider = TestSpider::seeds(&["http://site.test/a"])
        .handlers(
            Handlers::new()
                .callback("parse_start_url", |response: Response| -> CallbackResult {
                    json!({"callback": "parse_start_url", "url": response.url.as_str()}).into()
                })
                .callback("item", |response: Response| -> CallbackResult {
                    json!({"callback": "item", "url": response.url.as_str()}).into()
                }),
        )
        .rules(vec![Rule::new(HtmlLinkExtractor::new()).callback("item")]);
    let downloader = ScriptedDownloader::new()
        .route("/a", Route::html(r#"<a href="/b">to b</a>"#))
        .route("/b", Route::html("<p>leaf</p>"));

    let journal = crawl(spider, downloader).await;

    let mut items = journal.items();
    items.sort_by(|a, b| a["callback"].as_str().cmp(&b["callback"].as_str()));
    assert_eq!(
        items,
        vec![
            json!({"callback": "item", "url": "http://site.test/b"}),
            json!({"callback": "parse_start_url", "url": "http://site.test/a"}),
        ]
    );
}

fn chain_downloader() -> ScriptedDownloader {
    ScriptedDownloader::new()
        .route("/a", Route::html(r#"<a href="/b">to b</a>"#))
        .route("/b", Route::html(r#"<a href="/c">to c</a>"#))
        .route("/c", Route::html("<p>end</p>"))
}

fn link_text_handler() -> Handlers {
    Handlers::new().callback("item", |response: Response| -> CallbackResult {
        json!({
            "url": response.url.as_str(),
            "text": response.meta().get(META_LINK_TEXT),
        })
        .into()
    })
}

#[tokio::test]
async fn rule_with_callback_does_not_follow_by_default() {
    let spider = TestSpider::seeds(&["http://site.test/a"])
        .handlers(link_text_handler())
        .rules(vec![Rule::new(HtmlLinkExtractor::new()).callback("item")]);
    let downloader = chain_downloader();
    let fetched = downloader.fetch_log();

    let journal = crawl(spider, downloader).await;

    assert_eq!(
        *fetched.lock(),
        vec![
            "http://site.test/a".to_string(),
            "http://site.test/b".to_string()
        ]
    );
    assert_eq!(
        journal.items(),
        vec![json!({"url": "http://site.test/b", "text": "to b"})]
    );
}

#[tokio::test]
async fn following_rule_scans_its_own_responses() {
    let spider = TestSpider::seeds(&["http://site.test/a"])
        .handlers(link_text_handler())
        .rules(vec![
            Rule::new(HtmlLinkExtractor::new())
                .callback("item")
                .follow(true),
        ]);
    let downloader = chain_downloader();
    let fetched = downloader.fetch_log();

    let journal = crawl(spider, downloader).await;

    assert_eq!(fetched.lock().len(), 3);
    assert_eq!(journal.items().len(), 2);
}

#[tokio::test]
async fn explicit_callback_seed_is_not_scanned() {
    let spider = TestSpider::new(|| {
        Request::get("http://site.test/a")
            .unwrap()
            .with_callback("item")
            .into()
    })
    .handlers(link_text_handler())
    .rules(vec![Rule::new(HtmlLinkExtractor::new()).callback("item")]);
    let downloader = chain_downloader();
    let fetched = downloader.fetch_log();

    let journal = crawl(spider, downloader).await;

    assert_eq!(*fetched.lock(), vec!["http://site.test/a".to_string()]);
    assert_eq!(journal.items().len(), 1);
}

#[tokio::test]
async fn only_the_first_matching_rule_is_used() {
    let spider = TestSpider::seeds(&["http://site.test/index"])
        .handlers(
            Handlers::new()
                .callback("first", |response: Response| -> CallbackResult {
                    json!({"rule": "first", "url": response.url.as_str()}).into()
                })
                .callback("second", |response: Response| -> CallbackResult {
                    json!({"rule": "second", "url": response.url.as_str()}).into()
                }),
        )
        .rules(vec![
            Rule::new(HtmlLinkExtractor::new().allow(["/nothing-here"]).unwrap()).callback("zero"),
            Rule::new(HtmlLinkExtractor::new().allow(["/b$"]).unwrap()).callback("first"),
            Rule::new(HtmlLinkExtractor::new()).callback("second"),
        ]);
    let downloader = ScriptedDownloader::new().route(
        "/index",
        Route::html(r#"<a href="/b">b</a><a href="/c">c</a>"#),
    );
    let fetched = downloader.fetch_log();

    let journal = crawl(spider, downloader).await;

    assert_eq!(
        journal.items(),
        vec![json!({"rule": "first", "url": "http://site.test/b"})]
    );
    assert!(!fetched.lock().iter().any(|u| u.ends_with("/c")));
}

#[tokio::test]
async fn hard_stopped_page_is_not_scanned() {
    init_tracing();
    let spider = TestSpider::seeds(&["http://site.test/a"])
        .handlers(link_text_handler())
        .rules(vec![Rule::new(HtmlLinkExtractor::new()).callback("item")]);
    let downloader = chain_downloader();
    let fetched = downloader.fetch_log();
    let journal = Journal::new();

    CrawlerBuilder::new(spider)
        .with_config(fast_config())
        .downloader(downloader)
        .add_bytes_received_hook(|_: &Bytes, request: &Request| {
            if request.url().path() == "/a" {
                ControlSignal::StopHard("stop the seed".into())
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

    assert_eq!(*fetched.lock(), vec!["http://site.test/a".to_string()]);
    assert!(journal.items().is_empty());
    let faults = journal.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].error().is_download_stopped());
}
