//! Integration tests for the archiver
//!
//! These tests use wiremock to serve vBulletin-shaped pages and drive the
//! full archive cycle end-to-end: config, lock, store, fetcher, parser and
//! record writer.

use forum_archiver::config::{Config, CrawlerConfig, JobEntry, OutputConfig, SourceConfig, UserAgentConfig};
use forum_archiver::crawler::{archive, run_job, ArchiveOptions, FinalStatus, InterruptHandler};
use forum_archiver::state::NodeState;
use forum_archiver::storage::{JobLock, ProgressStore, RunStatus, SqliteStorage, StorageError};
use forum_archiver::{ArchiveError, Entity};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JOB: &str = "forum-14";

/// Creates a test configuration pointing at the mock server
fn create_test_config(base_url: &str, dir: &Path) -> Config {
    Config {
        source: SourceConfig {
            base_url: base_url.to_string(),
        },
        crawler: CrawlerConfig {
            delay_seconds: 0.0,
            request_timeout_seconds: 5,
            max_retries: 2,
            backoff_base_seconds: 0.01,
            backoff_cap_seconds: 0.01,
            jitter_seconds: 0.0,
            rate_limit_wait_seconds: 0.01,
            max_node_attempts: 2,
            node_retry_delay_seconds: 0,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            database_path: dir.join("progress.db").to_string_lossy().into_owned(),
            archive_dir: dir.join("records").to_string_lossy().into_owned(),
        },
        jobs: vec![JobEntry {
            id: JOB.to_string(),
            forum_id: Some("14".to_string()),
            thread_limit: None,
        }],
    }
}

fn forum_listing(threads: &[(&str, &str)]) -> String {
    let rows: String = threads
        .iter()
        .map(|(id, title)| {
            format!(
                r#"<tr>
                  <td class="alt1"><a id="thread_title_{id}" href="showthread.php?t={id}">{title}</a></td>
                  <td class="alt2"><a href="member.php?u=1">collector</a></td>
                  <td class="alt1">2</td>
                  <td class="alt1">50</td>
                </tr>"#
            )
        })
        .collect();

    format!(
        r#"<html><head><title>Pre-War Baseball Cards</title></head><body>
        <table id="threadslist">{rows}</table>
        </body></html>"#
    )
}

fn thread_page(title: &str, post_id: u32, content: &str) -> String {
    format!(
        r#"<html><head><title>{title}</title></head><body>
        <span class="navbar"><a href="forumdisplay.php?f=14">Pre-War</a></span>
        <div id="post_{post_id}">
          <div class="username_container"><a href="member.php?u=1">collector</a></div>
          <div class="date">01-02-2015, 10:15 AM</div>
          <div class="postcontent">{content}</div>
        </div>
        </body></html>"#
    )
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

/// Serves forum 14 with two single-page threads
async fn mount_forum(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/forumdisplay.php"))
        .and(query_param("f", "14"))
        .respond_with(html(forum_listing(&[("900", "T206 Wagner"), ("901", "Cobb portrait")])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/showthread.php"))
        .and(query_param("t", "900"))
        .respond_with(html(thread_page("T206 Wagner", 5001, "Nice card.")))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/showthread.php"))
        .and(query_param("t", "901"))
        .respond_with(html(thread_page("Cobb portrait", 6001, "Green background.")))
        .mount(server)
        .await;
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or(0)
}

fn options() -> ArchiveOptions {
    ArchiveOptions {
        config_hash: "test-hash".to_string(),
        ..ArchiveOptions::default()
    }
}

#[tokio::test]
async fn test_full_archive_of_small_forum() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let report = archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .expect("archive failed to start");

    assert_eq!(report.status, FinalStatus::Completed);
    assert_eq!(report.error, None);
    assert_eq!(report.stats.to_string(), "{Done:5, Pending:0, Failed:0, Abandoned:0}");
    // Thread 900 and its first post page share a URL, as do 901's
    assert_eq!(request_count(&mock_server).await, 5);

    let records = dir.path().join("records");
    assert!(records.join("forums/14/1.json").exists());
    assert!(records.join("threads/14/900.json").exists());
    assert!(records.join("threads/14/901.json").exists());
    assert!(records.join("posts/900/1.json").exists());

    let stored: Entity =
        serde_json::from_slice(&std::fs::read(records.join("posts/901/1.json")).unwrap()).unwrap();
    match stored {
        Entity::PostPage(page) => {
            assert_eq!(page.thread_id, "901");
            assert_eq!(page.posts.len(), 1);
            assert_eq!(page.posts[0].content, "Green background.");
        }
        other => panic!("unexpected record {:?}", other),
    }

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    let run = storage.latest_run(JOB).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "test-hash");
}

#[tokio::test]
async fn test_rerun_of_completed_job_fetches_nothing() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let first = archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();
    assert_eq!(first.status, FinalStatus::Completed);
    let requests = request_count(&mock_server).await;

    let second = archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();
    assert_eq!(second.status, FinalStatus::Completed);
    assert_eq!(second.processed, 0);
    assert_eq!(second.stats.done, 5);
    assert_eq!(request_count(&mock_server).await, requests);
}

#[tokio::test]
async fn test_interrupted_run_resumes() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let stopped = InterruptHandler::new();
    stopped.request_stop("test");
    let first = archive(&config, JOB, &stopped, &options()).await.unwrap();
    assert_eq!(first.status, FinalStatus::Interrupted);
    assert_eq!(first.status.exit_code(), 75);
    assert_eq!(first.stats.pending, 1);
    assert_eq!(request_count(&mock_server).await, 0);

    let second = archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();
    assert_eq!(second.status, FinalStatus::Completed);
    assert_eq!(second.stats.done, 5);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.latest_run(JOB).unwrap().unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let mock_server = MockServer::start().await;

    // The first listing request fails, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/forumdisplay.php"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let report = archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    assert_eq!(report.stats.done, 5);
    assert_eq!(request_count(&mock_server).await, 6);
}

#[tokio::test]
async fn test_missing_thread_is_abandoned_without_aborting() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/forumdisplay.php"))
        .respond_with(html(forum_listing(&[("900", "T206 Wagner"), ("404", "Deleted")])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/showthread.php"))
        .and(query_param("t", "900"))
        .respond_with(html(thread_page("T206 Wagner", 5001, "Nice card.")))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/showthread.php"))
        .and(query_param("t", "404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let report = archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    assert_eq!(report.stats.done, 3);
    assert_eq!(report.stats.abandoned, 1);
    assert!(!dir.path().join("records/threads/14/404.json").exists());
}

#[tokio::test]
async fn test_fresh_start_recrawls_everything() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();

    let fresh = ArchiveOptions {
        fresh: true,
        ..options()
    };
    let report = archive(&config, JOB, &InterruptHandler::new(), &fresh)
        .await
        .unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    assert_eq!(report.processed, 5);
    assert_eq!(request_count(&mock_server).await, 10);
}

#[tokio::test]
async fn test_rescrape_refetches_one_node() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();
    let before = request_count(&mock_server).await;

    let rescrape = ArchiveOptions {
        rescrape: Some("forum:14".parse().unwrap()),
        ..options()
    };
    let report = archive(&config, JOB, &InterruptHandler::new(), &rescrape)
        .await
        .unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    assert_eq!(report.processed, 1);
    assert_eq!(report.stats.done, 5);
    assert_eq!(request_count(&mock_server).await, before + 1);
}

#[tokio::test]
async fn test_rescrape_of_thread_by_reference() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();

    let rescrape = ArchiveOptions {
        rescrape: Some("post_page:901".parse().unwrap()),
        ..options()
    };
    let report = archive(&config, JOB, &InterruptHandler::new(), &rescrape)
        .await
        .unwrap();
    assert_eq!(report.processed, 1);

    let unknown = ArchiveOptions {
        rescrape: Some("thread:12345".parse().unwrap()),
        ..options()
    };
    let result = archive(&config, JOB, &InterruptHandler::new(), &unknown).await;
    assert!(matches!(
        result,
        Err(ArchiveError::Storage(StorageError::UnknownNode { .. }))
    ));
}

#[tokio::test]
async fn test_refresh_listings_picks_up_new_threads() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    archive(&config, JOB, &InterruptHandler::new(), &options())
        .await
        .unwrap();

    // A new thread now tops the listing
    mock_server.reset().await;
    Mock::given(method("GET"))
        .and(path("/forumdisplay.php"))
        .and(query_param("f", "14"))
        .respond_with(html(forum_listing(&[
            ("902", "New find"),
            ("900", "T206 Wagner"),
            ("901", "Cobb portrait"),
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/showthread.php"))
        .and(query_param("t", "902"))
        .respond_with(html(thread_page("New find", 7001, "Just bought this.")))
        .mount(&mock_server)
        .await;

    let refresh = ArchiveOptions {
        refresh_listings: true,
        ..options()
    };
    let report = archive(&config, JOB, &InterruptHandler::new(), &refresh)
        .await
        .unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    // Listing page, the new thread and its page of posts
    assert_eq!(report.processed, 3);
    assert_eq!(report.stats.done, 7);
    assert!(dir.path().join("records/threads/14/902.json").exists());

    let threads_refetched = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query().is_some_and(|q| q.contains("t=900") || q.contains("t=901")))
        .count();
    assert_eq!(threads_refetched, 0);
}

#[tokio::test]
async fn test_thread_limit_caps_archived_threads() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let limited = ArchiveOptions {
        thread_limit: Some(1),
        ..options()
    };
    let report = archive(&config, JOB, &InterruptHandler::new(), &limited)
        .await
        .unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    assert_eq!(report.stats.done, 3);
    assert!(dir.path().join("records/threads/14/900.json").exists());
    assert!(!dir.path().join("records/threads/14/901.json").exists());
}

#[tokio::test]
async fn test_board_job_archives_every_listed_forum() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Forums</title></head><body>
            <table class="tborder">
              <tr>
                <td class="alt1Active" id="f14">
                  <div><a href="forumdisplay.php?f=14"><strong>Pre-War</strong></a></div>
                  <div class="smallfont">Vintage cards</div>
                </td>
                <td class="alt1">2</td>
                <td class="alt2">4</td>
              </tr>
              <tr>
                <td class="alt1Active" id="f20"><a href="forumdisplay.php?f=20">Post-War</a></td>
              </tr>
            </table>
            </body></html>"#
                .to_string(),
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forumdisplay.php"))
        .and(query_param("f", "20"))
        .respond_with(html(forum_listing(&[])))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&mock_server.uri(), dir.path());
    config.jobs = vec![JobEntry {
        id: "net54".to_string(),
        forum_id: None,
        thread_limit: None,
    }];

    let report = archive(&config, "net54", &InterruptHandler::new(), &options())
        .await
        .unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    // Board index, two listings, two threads and their post pages
    assert_eq!(report.stats.done, 7);

    let records = dir.path().join("records");
    let stored: Entity =
        serde_json::from_slice(&std::fs::read(records.join("boards/index.json")).unwrap()).unwrap();
    match stored {
        Entity::Board(board) => {
            assert_eq!(board.forums.len(), 2);
            assert_eq!(board.forums[0].thread_count, Some(2));
            assert_eq!(board.forums[0].post_count, Some(4));
            assert_eq!(board.forums[0].description.as_deref(), Some("Vintage cards"));
        }
        other => panic!("unexpected record {:?}", other),
    }
    assert!(records.join("forums/20/1.json").exists());
    assert!(records.join("threads/14/901.json").exists());

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    let nodes = storage.nodes("net54", Some(NodeState::Done)).unwrap();
    assert_eq!(nodes.len(), 7);
}

#[tokio::test]
async fn test_second_process_is_locked_out() {
    let mock_server = MockServer::start().await;
    mount_forum(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let _held = JobLock::acquire(dir.path(), JOB).unwrap();
    let result = archive(&config, JOB, &InterruptHandler::new(), &options()).await;

    assert!(matches!(result, Err(ArchiveError::JobLocked { .. })));
    assert_eq!(request_count(&mock_server).await, 0);
}

#[tokio::test]
async fn test_unknown_job() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config("http://127.0.0.1:9", dir.path());

    let result = archive(&config, "missing", &InterruptHandler::new(), &options()).await;
    assert!(matches!(result, Err(ArchiveError::UnknownJob(_))));
}

#[test]
fn test_blocking_entry_point() {
    // The mock server lives on its own runtime; run_job builds another
    let server_runtime = tokio::runtime::Runtime::new().unwrap();
    let mock_server = server_runtime.block_on(async {
        let server = MockServer::start().await;
        mount_forum(&server).await;
        server
    });

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let report = run_job(&config, JOB, Some(Duration::from_secs(600)), &options()).unwrap();

    assert_eq!(report.status, FinalStatus::Completed);
    assert_eq!(report.stats.done, 5);
    assert!(report.run_id.is_some());
}
