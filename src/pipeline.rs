use std::path::{Path, PathBuf};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::fetch::{FetchClient, FetchOutcome};
use crate::parser::movie::{extract_movie, MovieRecord, MOVIE_HEADERS, MOVIE_KEY};
use crate::parser::review::{ParentFields, REVIEW_HEADERS, REVIEW_KEY};
use crate::reviews::{collect_reviews, ReviewLimits};
use crate::settings::Settings;
use crate::store::{load_rows, load_tasks, CheckpointStore};
use crate::text::is_present;

/// What a processed task produced.
pub enum TaskOutcome<R> {
    Rows(Vec<R>),
    /// Nothing to do for this task, so nothing is checkpointed for it.
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: usize,
    pub checkpointed: usize,
    pub attempted: usize,
    pub completed: usize,
    pub skipped: usize,
    pub rows_appended: usize,
    pub failed: Vec<String>,
    pub output: PathBuf,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Done: {} attempted ({} ok, {} skipped, {} failed), {} rows appended to {}.",
            self.attempted,
            self.completed,
            self.skipped,
            self.failed.len(),
            self.rows_appended,
            self.output.display(),
        );
        println!(
            "{} of {} tasks were already done before this run.",
            self.checkpointed, self.total
        );
        for key in &self.failed {
            println!("  failed: {}", key);
        }
    }
}

/// Process every task whose key is not yet in `store`, appending each task's
/// rows as soon as it finishes. A failing task is logged and skipped; the
/// run goes on with the next one.
pub fn run_checkpointed<T, R, K, P>(
    tasks: &[T],
    store: &mut CheckpointStore,
    limit: Option<usize>,
    key_of: K,
    mut process: P,
) -> RunSummary
where
    R: Serialize,
    K: Fn(&T) -> &str,
    P: FnMut(&T) -> Result<TaskOutcome<R>>,
{
    let mut pending: Vec<&T> = tasks
        .iter()
        .filter(|task| !store.contains(key_of(*task)))
        .collect();
    let mut summary = RunSummary {
        total: tasks.len(),
        checkpointed: tasks.len() - pending.len(),
        output: store.path().to_path_buf(),
        ..RunSummary::default()
    };
    if let Some(n) = limit {
        pending.truncate(n);
    }
    info!(
        total = summary.total,
        done = summary.checkpointed,
        stored_keys = store.checkpointed(),
        remaining = pending.len(),
        output = %summary.output.display(),
        "starting run"
    );

    let pb = ProgressBar::new(summary.total as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_position(summary.checkpointed as u64);

    for task in pending {
        let key = key_of(task);
        pb.set_message(truncate(key, 48));
        summary.attempted += 1;

        let result = process(task).and_then(|outcome| match outcome {
            TaskOutcome::Rows(rows) => store.append(&rows).map(Some),
            TaskOutcome::Skipped => Ok(None),
        });
        match result {
            Ok(Some(rows)) => {
                summary.completed += 1;
                summary.rows_appended += rows;
            }
            Ok(None) => {
                pb.suspend(|| warn!(task = key, "skipped"));
                summary.skipped += 1;
            }
            Err(e) => {
                pb.suspend(|| error!(task = key, error = %format!("{:#}", e), "task failed"));
                summary.failed.push(key.to_string());
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        attempted = summary.attempted,
        completed = summary.completed,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        rows = summary.rows_appended,
        "run finished"
    );
    summary
}

/// Scrape a title page for each URL in the task list into the details store.
pub fn run_details(
    settings: &Settings,
    client: &FetchClient,
    input: &Path,
    output: &Path,
    limit: Option<usize>,
) -> Result<RunSummary> {
    let tasks = load_tasks(input, &settings.url_column)?;
    let origin = Url::parse(&settings.site_origin).ok();
    let mut store = CheckpointStore::open(output, &MOVIE_HEADERS, MOVIE_KEY)?;

    Ok(run_checkpointed(&tasks, &mut store, limit, String::as_str, |url| {
        match client.fetch(url)? {
            FetchOutcome::Page(doc) => Ok(TaskOutcome::Rows(vec![extract_movie(
                &doc,
                url,
                origin.as_ref(),
            )])),
            FetchOutcome::Skipped => Ok(TaskOutcome::Skipped),
        }
    }))
}

/// One row of the details store, as needed to collect its reviews.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewTask {
    pub title: String,
    pub url: String,
    pub director: String,
    pub reviews_url: String,
}

pub const REVIEW_TASK_COLUMNS: [&str; 4] = ["title", "url", "director", "reviews_url"];

impl ReviewTask {
    fn key(&self) -> &str {
        &self.url
    }

    fn parent(&self) -> ParentFields {
        ParentFields {
            title: self.title.clone(),
            url: self.url.clone(),
            director: self.director.clone(),
        }
    }

    fn has_reviews_link(&self) -> bool {
        is_present(&self.reviews_url) && self.reviews_url.starts_with("http")
    }
}

/// Collect reviews for every movie in the details store into the review store.
pub fn run_reviews(
    settings: &Settings,
    client: &FetchClient,
    input: &Path,
    output: &Path,
    limits: &ReviewLimits,
    limit: Option<usize>,
) -> Result<RunSummary> {
    let tasks: Vec<ReviewTask> = load_rows(input, &REVIEW_TASK_COLUMNS)?;
    let mut store = CheckpointStore::open(output, &REVIEW_HEADERS, REVIEW_KEY)?;
    info!(
        page_budget = limits.page_budget,
        max_reviews = limits.max_reviews,
        origin = %settings.site_origin,
        "review limits"
    );

    Ok(run_checkpointed(&tasks, &mut store, limit, ReviewTask::key, |task| {
        if !task.has_reviews_link() {
            debug!(movie = %task.url, "no reviews link, skipping");
            return Ok(TaskOutcome::Skipped);
        }
        let reviews = collect_reviews(client, &task.reviews_url, &task.parent(), limits)?;
        debug!(movie = %task.url, reviews = reviews.len(), "reviews collected");
        Ok(TaskOutcome::Rows(reviews))
    }))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::review::ReviewRecord;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    /// Shared sink for formatted log lines.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn settings(server: &MockServer) -> Settings {
        Settings {
            min_wait_secs: 0,
            max_wait_secs: 0,
            max_attempts: 2,
            site_origin: server.base_url(),
            ..Settings::default()
        }
    }

    fn title_page(name: &str) -> String {
        format!(
            r#"<html><body><h1 class="hero__primary-text">{name}</h1>
               <div data-testid="reviews-header"><a href="/title/{name}/reviews/">User reviews</a></div>
               </body></html>"#
        )
    }

    fn write_task_list(path: &Path, urls: &[String]) {
        let mut text = String::from("Release Group,URL\n");
        for (i, url) in urls.iter().enumerate() {
            text.push_str(&format!("Movie {},{}\n", i + 1, url));
        }
        fs::write(path, text).unwrap();
    }

    fn stored_urls(path: &Path) -> Vec<String> {
        load_rows::<MovieRecord>(path, &["url"])
            .unwrap()
            .into_iter()
            .map(|m| m.url)
            .collect()
    }

    #[test]
    fn resumes_and_isolates_failures() {
        let server = MockServer::start();
        let settings = settings(&server);
        let client = FetchClient::new(&settings).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        let output = dir.path().join("details.csv");

        let urls: Vec<String> = ["tt1", "tt2", "tt3", "tt4"]
            .iter()
            .map(|id| server.url(format!("/title/{}/", id)))
            .collect();
        write_task_list(&input, &urls);

        // tt1 and tt3 finished in an earlier run
        let mut store = CheckpointStore::open(&output, &MOVIE_HEADERS, MOVIE_KEY).unwrap();
        let done: Vec<MovieRecord> = [&urls[0], &urls[2]]
            .iter()
            .map(|u| MovieRecord {
                url: u.to_string(),
                ..MovieRecord::default()
            })
            .collect();
        store.append(&done).unwrap();
        drop(store);

        let done_mocks: Vec<_> = ["tt1", "tt3"]
            .iter()
            .map(|id| {
                server.mock(|when, then| {
                    when.method(GET).path(format!("/title/{}/", id));
                    then.status(200).body(title_page(id));
                })
            })
            .collect();
        let broken = server.mock(|when, then| {
            when.method(GET).path("/title/tt2/");
            then.status(503);
        });
        let ok = server.mock(|when, then| {
            when.method(GET).path("/title/tt4/");
            then.status(200).body(title_page("tt4"));
        });

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let summary = tracing::subscriber::with_default(subscriber, || {
            run_details(&settings, &client, &input, &output, None)
        })
        .unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.checkpointed, 2);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, vec![urls[1].clone()]);
        assert_eq!(broken.calls(), 2);
        assert_eq!(ok.calls(), 1);
        for mock in &done_mocks {
            assert_eq!(mock.calls(), 0);
        }

        let rows = load_rows::<MovieRecord>(&output, &["url"]).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].url, urls[3]);
        assert_eq!(rows[2].title, "tt4");
        assert_eq!(rows[2].reviews_url, server.url("/title/tt4/reviews/"));

        let log = logs.contents();
        let failures: Vec<&str> = log.lines().filter(|l| l.contains("task failed")).collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains(&urls[1]));
        // retry chatter stays below info so it does not interleave with the bar
        assert!(!log.contains("fetch failed"));
    }

    #[test]
    fn second_run_appends_nothing() {
        let server = MockServer::start();
        let settings = settings(&server);
        let client = FetchClient::new(&settings).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        let output = dir.path().join("details.csv");

        let urls: Vec<String> = vec![server.url("/title/tt1/"), server.url("/title/tt2/")];
        write_task_list(&input, &urls);
        let mock = server.mock(|when, then| {
            when.method(GET);
            then.status(200).body(title_page("any"));
        });

        let first = run_details(&settings, &client, &input, &output, None).unwrap();
        assert_eq!(first.rows_appended, 2);
        let second = run_details(&settings, &client, &input, &output, None).unwrap();
        assert_eq!(second.attempted, 0);
        assert_eq!(second.rows_appended, 0);
        assert_eq!(mock.calls(), 2);
        assert_eq!(stored_urls(&output), urls);
    }

    #[test]
    fn limit_caps_attempts() {
        let server = MockServer::start();
        let settings = settings(&server);
        let client = FetchClient::new(&settings).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        let output = dir.path().join("details.csv");

        let urls: Vec<String> = (1..=3).map(|i| server.url(format!("/title/tt{}/", i))).collect();
        write_task_list(&input, &urls);
        server.mock(|when, then| {
            when.method(GET);
            then.status(200).body(title_page("any"));
        });

        let summary = run_details(&settings, &client, &input, &output, Some(1)).unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(stored_urls(&output), vec![urls[0].clone()]);
    }

    #[test]
    fn non_title_urls_are_skipped() {
        let server = MockServer::start();
        let settings = settings(&server);
        let client = FetchClient::new(&settings).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        let output = dir.path().join("details.csv");
        write_task_list(&input, &[server.url("/name/nm1/")]);

        let summary = run_details(&settings, &client, &input, &output, None).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(summary.failed.is_empty());
        assert!(stored_urls(&output).is_empty());
    }

    #[test]
    fn empty_task_list_completes() {
        let server = MockServer::start();
        let settings = settings(&server);
        let client = FetchClient::new(&settings).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        let output = dir.path().join("details.csv");
        write_task_list(&input, &[]);

        let summary = run_details(&settings, &client, &input, &output, None).unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.attempted, 0);
    }

    #[test]
    fn missing_column_fails_before_output() {
        let server = MockServer::start();
        let settings = settings(&server);
        let client = FetchClient::new(&settings).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        let output = dir.path().join("details.csv");
        fs::write(&input, "Release Group,Link\nA,https://www.imdb.com/title/tt1/\n").unwrap();

        assert!(run_details(&settings, &client, &input, &output, None).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn reviews_for_each_movie() {
        let server = MockServer::start();
        let settings = settings(&server);
        let client = FetchClient::new(&settings).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let details = dir.path().join("details.csv");
        let output = dir.path().join("reviews.csv");

        let with_reviews = MovieRecord {
            title: "The Dark Knight".into(),
            url: server.url("/title/tt0468569/"),
            director: "Christopher Nolan".into(),
            reviews_url: server.url("/title/tt0468569/reviews/"),
            ..MovieRecord::default()
        };
        let without_reviews = MovieRecord {
            title: "Obscure".into(),
            url: server.url("/title/tt9/"),
            ..MovieRecord::default()
        };
        let mut store = CheckpointStore::open(&details, &MOVIE_HEADERS, MOVIE_KEY).unwrap();
        store.append(&[with_reviews.clone(), without_reviews]).unwrap();
        drop(store);

        let listing = fs::read_to_string("tests/fixtures/reviews_ajax_last.html").unwrap();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/title/tt0468569/reviews/");
            then.status(200).body(listing);
        });
        let limits = ReviewLimits {
            page_budget: 5,
            max_reviews: 100,
        };

        let summary = run_reviews(&settings, &client, &details, &output, &limits, None).unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.rows_appended, 1);

        let reviews: Vec<ReviewRecord> = load_rows(&output, &[REVIEW_KEY]).unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].movie_url, with_reviews.url);
        assert_eq!(reviews[0].movie_title, "The Dark Knight");
        assert_eq!(reviews[0].director, "Christopher Nolan");
        assert_eq!(reviews[0].author, "late_viewer");

        let again = run_reviews(&settings, &client, &details, &output, &limits, None).unwrap();
        assert_eq!(again.rows_appended, 0);
        assert_eq!(mock.calls(), 1);
    }
}
