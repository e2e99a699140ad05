use std::{
    collections::HashMap,
    fmt::Write as _,
    net::{TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

use schema::LeaderboardId;
use serde_json::json;
use store::{LeaderboardStore, StoreError};

use crate::{
    ADD_OLD_ENTRIES_PARAM, LIST_PARAM, MISSING_LIST_MESSAGE, OLD_ENTRIES_ADDED_MESSAGE,
    api::{LegacyImportSummary, SubmissionOutcome},
    feed::{FeedSource, LEGACY_FEED_URLS},
    importer::import_legacy_feeds,
    render_entries, submit_and_list, unknown_list_message,
};

mod http;
mod request;

pub(crate) use http::{HttpRequest, HttpResponse};
use http::{render_response_text, write_response};
use request::{
    parse_content_length, parse_request_line, read_http_request, request_params, split_target,
};

pub struct HighscoreRuntime {
    store: Arc<dyn LeaderboardStore>,
    feeds: Arc<dyn FeedSource>,
    legacy_feed_urls: Vec<String>,
    submissions_accepted: AtomicU64,
    submissions_rejected: AtomicU64,
    submissions_view_only: AtomicU64,
    list_requests: AtomicU64,
    missing_list_requests: AtomicU64,
    unknown_list_requests: AtomicU64,
    legacy_imports: AtomicU64,
    legacy_entries_imported: AtomicU64,
    store_errors: AtomicU64,
    started_at: Instant,
}

impl HighscoreRuntime {
    pub fn new(store: Arc<dyn LeaderboardStore>, feeds: Arc<dyn FeedSource>) -> Self {
        Self {
            store,
            feeds,
            legacy_feed_urls: LEGACY_FEED_URLS.iter().map(|url| url.to_string()).collect(),
            submissions_accepted: AtomicU64::new(0),
            submissions_rejected: AtomicU64::new(0),
            submissions_view_only: AtomicU64::new(0),
            list_requests: AtomicU64::new(0),
            missing_list_requests: AtomicU64::new(0),
            unknown_list_requests: AtomicU64::new(0),
            legacy_imports: AtomicU64::new(0),
            legacy_entries_imported: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn with_legacy_feed_urls(mut self, urls: Vec<String>) -> Self {
        self.legacy_feed_urls = urls;
        self
    }

    /// Imports every configured legacy feed into the store.
    pub fn import_legacy_entries(&self) -> LegacyImportSummary {
        let summary = import_legacy_feeds(
            self.store.as_ref(),
            self.feeds.as_ref(),
            &self.legacy_feed_urls,
        );
        self.legacy_imports.fetch_add(1, Ordering::Relaxed);
        self.legacy_entries_imported
            .fetch_add(summary.entries_inserted as u64, Ordering::Relaxed);
        summary
    }

    /// Plain-text reply for one submit-and-list request. Bad input is
    /// answered in the body; only store failures are errors.
    pub fn handle_highscore(&self, params: &HashMap<String, String>) -> Result<String, StoreError> {
        let mut out = String::new();
        if params.get(ADD_OLD_ENTRIES_PARAM).map(String::as_str) == Some("t") {
            let summary = self.import_legacy_entries();
            tracing::info!(
                feeds_completed = summary.feeds_completed,
                feeds_failed = summary.feeds_failed,
                entries_inserted = summary.entries_inserted,
                "legacy entries added"
            );
            out.push_str(OLD_ENTRIES_ADDED_MESSAGE);
            out.push('\n');
        }

        let Some(raw_list) = params.get(LIST_PARAM) else {
            self.missing_list_requests.fetch_add(1, Ordering::Relaxed);
            out.push_str(MISSING_LIST_MESSAGE);
            out.push('\n');
            return Ok(out);
        };
        let Some(leaderboard) = LeaderboardId::parse(raw_list) else {
            self.unknown_list_requests.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(list = %raw_list, "request for unknown list");
            out.push_str(&unknown_list_message(raw_list));
            out.push('\n');
            return Ok(out);
        };

        self.list_requests.fetch_add(1, Ordering::Relaxed);
        let response = submit_and_list(self.store.as_ref(), leaderboard, params)
            .inspect_err(|_| {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
            })?;
        let counter = match response.submission {
            SubmissionOutcome::Accepted => &self.submissions_accepted,
            SubmissionOutcome::ViewOnly => &self.submissions_view_only,
            SubmissionOutcome::Rejected(_) => &self.submissions_rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        out.push_str(&render_entries(&response.entries));
        Ok(out)
    }

    pub(crate) fn metrics_text(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let mut out = format!(
            "# TYPE highscore_submissions_accepted_total counter\n\
highscore_submissions_accepted_total {}\n\
# TYPE highscore_submissions_rejected_total counter\n\
highscore_submissions_rejected_total {}\n\
# TYPE highscore_submissions_view_only_total counter\n\
highscore_submissions_view_only_total {}\n\
# TYPE highscore_list_requests_total counter\n\
highscore_list_requests_total {}\n\
# TYPE highscore_missing_list_requests_total counter\n\
highscore_missing_list_requests_total {}\n\
# TYPE highscore_unknown_list_requests_total counter\n\
highscore_unknown_list_requests_total {}\n\
# TYPE highscore_legacy_imports_total counter\n\
highscore_legacy_imports_total {}\n\
# TYPE highscore_legacy_entries_imported_total counter\n\
highscore_legacy_entries_imported_total {}\n\
# TYPE highscore_store_errors_total counter\n\
highscore_store_errors_total {}\n\
# TYPE highscore_uptime_seconds gauge\n\
highscore_uptime_seconds {:.4}\n\
# TYPE highscore_entries gauge\n",
            load(&self.submissions_accepted),
            load(&self.submissions_rejected),
            load(&self.submissions_view_only),
            load(&self.list_requests),
            load(&self.missing_list_requests),
            load(&self.unknown_list_requests),
            load(&self.legacy_imports),
            load(&self.legacy_entries_imported),
            load(&self.store_errors),
            self.started_at.elapsed().as_secs_f64()
        );
        for leaderboard in LeaderboardId::all() {
            match self.store.entry_count(leaderboard) {
                Ok(count) => {
                    let _ = writeln!(out, "highscore_entries{{list=\"{leaderboard}\"}} {count}");
                }
                Err(err) => {
                    tracing::warn!(list = %leaderboard, error = %err, "entry count unavailable");
                }
            }
        }
        out
    }
}

pub(crate) type SharedRuntime = Arc<HighscoreRuntime>;
pub(crate) const MAX_HTTP_BODY_BYTES: usize = 1024 * 1024;
const SOCKET_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HTTP_WORKERS: usize = 4;

pub fn serve_http_with_workers(
    runtime: HighscoreRuntime,
    bind_addr: &str,
    worker_count: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    let worker_count = worker_count.max(1);
    tracing::info!(bind = %bind_addr, workers = worker_count, "highscore http transport listening");
    let runtime: SharedRuntime = Arc::new(runtime);
    let (tx, rx) = mpsc::channel::<TcpStream>();
    let rx = Arc::new(Mutex::new(rx));

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let runtime = Arc::clone(&runtime);
            let rx = Arc::clone(&rx);
            scope.spawn(move || {
                loop {
                    let stream = {
                        let guard = match rx.lock() {
                            Ok(guard) => guard,
                            Err(_) => break,
                        };
                        match guard.recv() {
                            Ok(stream) => stream,
                            Err(_) => break,
                        }
                    };
                    if let Err(err) = handle_connection(&runtime, stream) {
                        tracing::warn!(error = %err, "highscore transport error");
                    }
                }
            });
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if tx.send(stream).is_err() {
                        tracing::error!("highscore transport worker queue closed");
                        break;
                    }
                }
                Err(err) => tracing::warn!(error = %err, "highscore transport accept error"),
            }
        }
        drop(tx);
    });

    Ok(())
}

/// Parses one complete raw HTTP/1.x request and returns the raw response.
pub fn handle_http_request_bytes(
    runtime: &Arc<HighscoreRuntime>,
    raw_request: &[u8],
) -> Result<Vec<u8>, String> {
    let header_end = raw_request
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| "missing HTTP header terminator".to_string())?;
    let header_block = std::str::from_utf8(&raw_request[..header_end])
        .map_err(|_| "request headers must be valid UTF-8".to_string())?;
    let body = &raw_request[header_end + 4..];

    let mut lines = header_block.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| "missing request line".to_string())?;
    let (method, target) = parse_request_line(request_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| "invalid HTTP header".to_string())?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let content_length = parse_content_length(&headers)?;
    if content_length != body.len() {
        return Err("content-length does not match body size".to_string());
    }

    let request = HttpRequest {
        method,
        target,
        headers,
        body: body.to_vec(),
    };
    let response = handle_request(runtime, &request);
    Ok(render_response_text(&response).into_bytes())
}

fn handle_connection(runtime: &SharedRuntime, mut stream: TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;
    stream.set_write_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;

    let request = match read_http_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(err) => return write_response(&mut stream, HttpResponse::bad_request(&err)),
    };

    let response = handle_request(runtime, &request);
    write_response(&mut stream, response)
}

pub(crate) fn handle_request(runtime: &SharedRuntime, request: &HttpRequest) -> HttpResponse {
    let (path, query) = split_target(&request.target);
    tracing::debug!(method = %request.method, path = %path, "http request");
    match (request.method.as_str(), path.as_str()) {
        ("GET", "/health") => HttpResponse::ok_json(json!({ "status": "ok" }).to_string()),
        ("GET", "/metrics") => HttpResponse::ok_metrics(runtime.metrics_text()),
        ("GET" | "POST", "/" | "/highscore") => {
            let params = match request_params(request, query) {
                Ok(params) => params,
                Err(err) => return HttpResponse::bad_request(&err),
            };
            match runtime.handle_highscore(&params) {
                Ok(body) => HttpResponse::ok_plain(body),
                Err(err) => {
                    tracing::error!(error = %err, "highscore request failed");
                    HttpResponse::internal_server_error(&err.to_string())
                }
            }
        }
        (_, "/health") | (_, "/metrics") => {
            HttpResponse::method_not_allowed(&format!("{path} only supports GET"))
        }
        (_, "/" | "/highscore") => {
            HttpResponse::method_not_allowed(&format!("{path} only supports GET and POST"))
        }
        _ => HttpResponse::not_found("not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::StaticFeedSource;
    use schema::Entry;
    use store::InMemoryStore;

    struct FailingStore;

    impl LeaderboardStore for FailingStore {
        fn insert(&self, _entry: Entry) -> Result<(), StoreError> {
            Err(StoreError::Io("disk full".to_string()))
        }

        fn top_k(&self, _leaderboard: LeaderboardId, _k: usize) -> Result<Vec<Entry>, StoreError> {
            Err(StoreError::Io("disk full".to_string()))
        }

        fn entry_count(&self, _leaderboard: LeaderboardId) -> Result<usize, StoreError> {
            Err(StoreError::Io("disk full".to_string()))
        }
    }

    fn runtime_with(store: Arc<dyn LeaderboardStore>) -> SharedRuntime {
        Arc::new(HighscoreRuntime::new(store, Arc::new(StaticFeedSource::new())))
    }

    fn sample_runtime() -> SharedRuntime {
        runtime_with(Arc::new(InMemoryStore::new()))
    }

    fn get(target: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".to_string(),
            target: target.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn highscore_orders_submissions_and_counts_outcomes() {
        let runtime = sample_runtime();
        handle_request(
            &runtime,
            &get("/highscore?highScoreList=breakout&name=Alice&score=100&level=3&date=2024-01-01"),
        );
        handle_request(
            &runtime,
            &get("/highscore?highScoreList=breakout&name=Bob&score=200&level=5&date=2024-01-02"),
        );
        handle_request(
            &runtime,
            &get("/highscore?highScoreList=breakout&name=Eve&score=x&level=5&date=2024-01-02"),
        );
        let response = handle_request(&runtime, &get("/?highScoreList=breakout"));
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            "name=Bob,score=200,level=5,date=2024-01-02\nname=Alice,score=100,level=3,date=2024-01-01\n"
        );

        let metrics = runtime.metrics_text();
        assert!(metrics.contains("highscore_submissions_accepted_total 2\n"));
        assert!(metrics.contains("highscore_submissions_rejected_total 1\n"));
        assert!(metrics.contains("highscore_submissions_view_only_total 1\n"));
        assert!(metrics.contains("highscore_entries{list=\"breakout\"} 2\n"));
        assert!(metrics.contains("highscore_entries{list=\"columns\"} 0\n"));
    }

    #[test]
    fn missing_and_unknown_lists_are_answered_in_body() {
        let runtime = sample_runtime();
        let missing = handle_request(&runtime, &get("/highscore"));
        assert_eq!(missing.status, 200);
        assert_eq!(missing.body, "You need to pick a high score list\n");

        let unknown = handle_request(&runtime, &get("/highscore?highScoreList=chess&score=1"));
        assert_eq!(unknown.status, 200);
        assert_eq!(unknown.body, "The high score list chess does not exist\n");
        assert!(runtime
            .metrics_text()
            .contains("highscore_unknown_list_requests_total 1\n"));
    }

    #[test]
    fn old_entries_are_imported_before_listing() {
        let feeds = StaticFeedSource::new()
            .with_feed("mem://breakout", "breakout\nAlice,100,3,2024-01-01\n");
        let runtime = Arc::new(
            HighscoreRuntime::new(Arc::new(InMemoryStore::new()), Arc::new(feeds))
                .with_legacy_feed_urls(vec!["mem://breakout".to_string()]),
        );
        let response = handle_request(
            &runtime,
            &get("/highscore?addOldEntries=t&highScoreList=breakout"),
        );
        assert_eq!(
            response.body,
            "The old high score entries have been added\nname=Alice,score=100,level=3,date=2024-01-01\n"
        );

        let ignored = handle_request(
            &runtime,
            &get("/highscore?addOldEntries=true&highScoreList=breakout"),
        );
        assert!(!ignored.body.starts_with("The old high score entries"));
        assert!(runtime
            .metrics_text()
            .contains("highscore_legacy_entries_imported_total 1\n"));
    }

    #[test]
    fn store_failure_maps_to_internal_server_error() {
        let runtime = runtime_with(Arc::new(FailingStore));
        let response = handle_request(&runtime, &get("/highscore?highScoreList=breakout"));
        assert_eq!(response.status, 500);
        assert!(response.body.contains("disk full"));
        assert!(runtime.metrics_text().contains("highscore_store_errors_total 1\n"));
    }

    #[test]
    fn routing_rejects_unknown_paths_and_methods() {
        let runtime = sample_runtime();
        assert_eq!(handle_request(&runtime, &get("/v1/scores")).status, 404);

        let mut delete = get("/highscore");
        delete.method = "DELETE".to_string();
        assert_eq!(handle_request(&runtime, &delete).status, 405);

        let mut post_health = get("/health");
        post_health.method = "POST".to_string();
        assert_eq!(handle_request(&runtime, &post_health).status, 405);
    }

    #[test]
    fn invalid_utf8_form_body_is_bad_request() {
        let runtime = sample_runtime();
        let request = HttpRequest {
            method: "POST".to_string(),
            target: "/highscore".to_string(),
            headers: HashMap::from([(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )]),
            body: vec![0xff, 0xfe],
        };
        assert_eq!(handle_request(&runtime, &request).status, 400);

        let untyped = HttpRequest {
            headers: HashMap::new(),
            ..request
        };
        let response = handle_request(&runtime, &untyped);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "You need to pick a high score list\n");
    }
}
