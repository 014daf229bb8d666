// tests/store_sync_test.rs

// Drive the public store API against a mock HTTP backend. The push
// endpoint is not served here; these tests cover the pull path and the
// store's wiring around it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peersync::api::ApiClient;
use peersync::cache::MemoryCache;
use peersync::settings::ConnectionSettings;
use peersync::sync::channel::{ConnectionChannel, ReconnectPolicy};
use peersync::sync::gate::RefreshConfig;
use peersync::sync::status::NOT_CONNECTED;
use peersync::sync::store::{StoreView, SyncStore};
use url::Url;

const CONNECTED_STATUS: &str = r#"{"downloads":{"current_downloads":[{"filename":"a.txt","progress":"50/100 chunks (50.0%)","seeders":2}],"completed_downloads":["b.txt"]},"tracker":{"address":"127.0.0.1:9000","active_seeders":3}}"#;

struct BackendOptions {
    configure_ok: bool,
    fail_status: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            configure_ok: true,
            fail_status: false,
        }
    }
}

struct MockBackend {
    port: u16,
    status_requests: Arc<AtomicUsize>,
    files_requests: Arc<AtomicUsize>,
}

fn json_response(body: &str) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    tiny_http::Response::from_string(body).with_header(
        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
    )
}

/// Serve the backend's REST surface on an ephemeral port. The first
/// catalog pull returns two bare filenames, later ones a single
/// structured entry, so wholesale replacement is observable.
fn spawn_backend(options: BackendOptions) -> MockBackend {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let status_requests = Arc::new(AtomicUsize::new(0));
    let files_requests = Arc::new(AtomicUsize::new(0));
    let status_counter = status_requests.clone();
    let files_counter = files_requests.clone();

    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let url = request.url().to_string();
            match url.as_str() {
                "/api/configure" => {
                    let body = if options.configure_ok {
                        r#"{"success": true}"#
                    } else {
                        r#"{"success": false}"#
                    };
                    let _ = request.respond(json_response(body));
                }
                "/api/status" => {
                    status_counter.fetch_add(1, Ordering::SeqCst);
                    if options.fail_status {
                        let _ = request.respond(
                            tiny_http::Response::from_string("boom").with_status_code(500),
                        );
                    } else {
                        let _ = request.respond(json_response(CONNECTED_STATUS));
                    }
                }
                "/api/files" => {
                    let pulls = files_counter.fetch_add(1, Ordering::SeqCst);
                    let body = if pulls == 0 {
                        r#"{"files": ["a.txt", "b.txt"]}"#
                    } else {
                        r#"{"files": [{"filename": "c.txt", "size": 7, "seeders": 1}]}"#
                    };
                    let _ = request.respond(json_response(body));
                }
                "/api/download" => {
                    let _ = request.respond(json_response(r#"{"success": true}"#));
                }
                "/api/files/shared.txt" => {
                    let _ = request.respond(tiny_http::Response::from_string("hello peersync"));
                }
                _ => {
                    let _ = request
                        .respond(tiny_http::Response::from_string("not found").with_status_code(404));
                }
            }
        }
    });

    MockBackend {
        port,
        status_requests,
        files_requests,
    }
}

async fn build_store(backend: &MockBackend, refresh: RefreshConfig) -> SyncStore {
    let api = ApiClient::new(
        Url::parse(&format!("http://127.0.0.1:{}/api", backend.port)).unwrap(),
    )
    .unwrap();
    // The mock serves no websocket endpoint; keep the channel's retry
    // noise short.
    let channel = ConnectionChannel::new(
        Url::parse(&format!("ws://127.0.0.1:{}/ws", backend.port)).unwrap(),
        ReconnectPolicy {
            base_delay: Duration::from_millis(50),
            max_attempts: Some(1),
            ..Default::default()
        },
        Duration::from_secs(30),
    );
    SyncStore::new(api, channel, Arc::new(MemoryCache::default()), refresh).await
}

async fn wait_for(store: &SyncStore, predicate: impl Fn(&StoreView) -> bool) {
    let mut rx = store.subscribe();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if predicate(&rx.borrow_and_update()) {
            return;
        }
        tokio::time::timeout_at(deadline, rx.changed())
            .await
            .expect("timed out waiting for store update")
            .expect("store dropped");
    }
}

#[tokio::test]
async fn connect_pulls_status_and_catalog() {
    let backend = spawn_backend(BackendOptions::default());
    let refresh = RefreshConfig {
        min_interval: Duration::from_millis(200),
        debounce: Duration::from_millis(20),
    };
    let store = build_store(&backend, refresh).await;

    assert!(store.connect_to_tracker().await);

    let view = store.view();
    assert!(view.connected);
    let snapshot = view.snapshot.unwrap();
    assert_eq!(snapshot.tracker.address, "127.0.0.1:9000");
    assert_eq!(snapshot.tracker.active_seeders, Some(3));
    assert_eq!(snapshot.downloads.current.len(), 1);
    assert_eq!(snapshot.downloads.completed, vec!["b.txt".to_string()]);

    // The connectivity flip schedules one catalog fetch on its own.
    wait_for(&store, |v| v.files.len() == 2).await;
    let view = store.view();
    assert_eq!(view.files[0].filename, "a.txt");
    assert_eq!(view.files[0].size, None);
    assert!(!view.loading);

    store.shutdown();
}

#[tokio::test]
async fn refresh_bursts_collapse_and_throttle() {
    let backend = spawn_backend(BackendOptions::default());
    let refresh = RefreshConfig {
        min_interval: Duration::from_millis(400),
        debounce: Duration::from_millis(50),
    };
    let store = build_store(&backend, refresh).await;
    assert!(store.connect_to_tracker().await);

    // A burst of refreshes collapses with the initial fetch into one pull.
    for _ in 0..5 {
        store.refresh_files();
    }
    wait_for(&store, |v| v.files.len() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.files_requests.load(Ordering::SeqCst), 1);

    // Inside the cooldown: silently dropped.
    store.refresh_files();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.files_requests.load(Ordering::SeqCst), 1);

    // After the cooldown the pull goes through and replaces the catalog
    // wholesale; the stale entries are gone.
    tokio::time::sleep(Duration::from_millis(400)).await;
    store.refresh_files();
    wait_for(&store, |v| v.files.len() == 1).await;
    assert_eq!(backend.files_requests.load(Ordering::SeqCst), 2);
    let view = store.view();
    assert_eq!(view.files[0].filename, "c.txt");
    assert_eq!(view.files[0].size, Some(7));

    store.shutdown();
}

#[tokio::test]
async fn failed_status_pull_degrades() {
    let backend = spawn_backend(BackendOptions {
        fail_status: true,
        ..Default::default()
    });
    let store = build_store(&backend, RefreshConfig::default()).await;

    assert!(!store.connect_to_tracker().await);

    let view = store.view();
    assert!(!view.connected);
    let snapshot = view.snapshot.unwrap();
    assert_eq!(snapshot.tracker.address, NOT_CONNECTED);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Failed to connect to backend")
    );
}

#[tokio::test]
async fn rejected_configuration_skips_the_status_pull() {
    let backend = spawn_backend(BackendOptions {
        configure_ok: false,
        ..Default::default()
    });
    let store = build_store(&backend, RefreshConfig::default()).await;

    assert!(!store.connect_to_tracker().await);
    assert_eq!(backend.status_requests.load(Ordering::SeqCst), 0);
    assert!(store.view().snapshot.is_none());
}

#[tokio::test]
async fn downloads_are_forwarded_and_materialized() {
    let backend = spawn_backend(BackendOptions::default());
    let store = build_store(&backend, RefreshConfig::default()).await;

    assert!(store.start_download("a.txt").await);

    let dir = tempfile::tempdir().unwrap();
    store.set_connection_settings(ConnectionSettings {
        download_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    assert!(store.download_to_client("shared.txt").await);
    let contents = std::fs::read_to_string(dir.path().join("shared.txt")).unwrap();
    assert_eq!(contents, "hello peersync");

    // Unknown files are a plain `false`, not an error.
    assert!(!store.download_to_client("missing.txt").await);
}
