//! End-to-end tests for the sogrep service.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use sogrep_core::ServiceConfig;
use sogrep_daemon::{Service, ServiceError, ServiceState};
use sogrep_http::HttpError;
use sogrep_indexer::IndexerError;

/// Encode a links database with one `links` member per package
fn links_db(packages: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (dir_name, payload) in packages {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(payload.len() as u64);
        builder
            .append_data(
                &mut header,
                format!("{}/links", dir_name),
                payload.as_bytes(),
            )
            .unwrap();
    }
    let raw = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).unwrap();
    encoder.finish().unwrap()
}

/// Write `<root>/<repo>/os/<arch>/<repo>.links.tar.gz` in a single write
fn write_links_db(root: &Path, repo: &str, arch: &str, packages: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(repo).join("os").join(arch);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}.links.tar.gz", repo));
    fs::write(&path, links_db(packages)).unwrap();
    path
}

fn test_config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        listen_address: "127.0.0.1:0".to_string(),
        repository_dir: root.to_path_buf(),
        debounce_interval_ms: 200,
        shutdown_timeout_ms: 5_000,
        ..ServiceConfig::default()
    }
}

async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    (status, body.to_string())
}

/// Poll until `check` holds or the timeout elapses
async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

type ServeTask = tokio::task::JoinHandle<Result<(), ServiceError>>;

async fn start(config: ServiceConfig) -> (Arc<Service>, SocketAddr, ServeTask) {
    let service = Arc::new(Service::new(config));
    let running = service.clone();
    let task = tokio::spawn(async move { running.serve().await });

    let ready = wait_until(Duration::from_secs(10), || {
        service.state() == ServiceState::Running && service.local_addr().is_some()
    })
    .await;
    assert!(ready, "service did not start");

    let addr = service.local_addr().unwrap();
    (service, addr, task)
}

async fn stop(service: &Service, task: ServeTask) {
    service.shutdown_handle().shutdown();
    let result = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(service.state(), ServiceState::Stopped);
}

/// Test lookups against the initial index
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lookup_after_startup() {
    let temp_dir = tempdir().unwrap();
    write_links_db(
        temp_dir.path(),
        "core",
        "x86_64",
        &[("zlib-1.2.11-1", "libz.so.1\n")],
    );

    let (service, addr, task) = start(test_config(temp_dir.path())).await;
    assert_eq!(service.store().generation(), 1);

    let (status, body) = get(addr, "/libz.so").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"packages":["zlib"]}"#);

    let (status, body) = get(addr, "/libssl.so").await;
    assert_eq!(status, 404);
    assert_eq!(body, "{}");

    stop(&service, task).await;
}

/// Rewriting an archive triggers exactly one rebuild
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rewrite_triggers_one_rebuild() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    write_links_db(root, "core", "x86_64", &[("zlib-1.2.11-1", "libz.so.1\n")]);
    write_links_db(root, "extra", "x86_64", &[("curl-7.76.1-1", "libc.so.6\n")]);

    let (service, addr, task) = start(test_config(root)).await;
    let store = service.store();
    assert_eq!(store.generation(), 1);

    write_links_db(
        root,
        "core",
        "x86_64",
        &[
            ("zlib-1.2.11-1", "libz.so.1\n"),
            ("openssl-1.1.1.k-1", "libssl.so.1.1\n"),
        ],
    );

    let rebuilt = wait_until(Duration::from_secs(10), || store.generation() >= 2).await;
    assert!(rebuilt, "no rebuild after rewrite");

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(store.generation(), 2);

    let (status, body) = get(addr, "/libssl.so").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"packages":["openssl"]}"#);
    let (status, _) = get(addr, "/libc.so").await;
    assert_eq!(status, 200);

    stop(&service, task).await;
}

/// A database replaced by rename is picked up by the next rebuild and watched again
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replaced_database_is_rewatched() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    let core = write_links_db(root, "core", "x86_64", &[("zlib-1.2.11-1", "libz.so.1\n")]);
    write_links_db(root, "extra", "x86_64", &[("curl-7.76.1-1", "libc.so.6\n")]);

    let (service, addr, task) = start(test_config(root)).await;
    let store = service.store();

    let staged = root.join("core.links.tar.gz.new");
    fs::write(&staged, links_db(&[("bzip2-1.0.8-4", "libbz2.so.1.0\n")])).unwrap();
    fs::rename(&staged, &core).unwrap();

    // A write elsewhere triggers a full rebuild, which sees the new file
    write_links_db(root, "extra", "x86_64", &[("curl-7.76.1-2", "libc.so.6\n")]);
    let found = wait_until(Duration::from_secs(10), || {
        store.lookup("libbz2.so").is_some()
    })
    .await;
    assert!(found, "replaced database was not re-indexed");
    assert!(store.lookup("libz.so").is_none());

    // Writes to the replacement are seen once it is watched again
    write_links_db(root, "core", "x86_64", &[("xz-5.2.5-1", "liblzma.so.5\n")]);
    let found = wait_until(Duration::from_secs(10), || {
        store.lookup("liblzma.so").is_some()
    })
    .await;
    assert!(found, "write to the replacement did not rebuild");

    let (status, body) = get(addr, "/liblzma.so").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"packages":["xz"]}"#);

    stop(&service, task).await;
}

/// A rebuild that finds no databases keeps serving the current index
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rebuild_without_databases_keeps_index() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path();
    let core = write_links_db(root, "core", "x86_64", &[("zlib-1.2.11-1", "libz.so.1\n")]);

    let config = ServiceConfig {
        debounce_interval_ms: 1_000,
        ..test_config(root)
    };
    let (service, addr, task) = start(config).await;
    let store = service.store();

    // Written, then gone before the flush that requests the rebuild
    fs::write(&core, links_db(&[("zlib-1.2.11-2", "libz.so.1\n")])).unwrap();
    fs::remove_file(&core).unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(store.generation(), 1);
    assert_eq!(service.state(), ServiceState::Running);

    let (status, body) = get(addr, "/libz.so").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"packages":["zlib"]}"#);

    stop(&service, task).await;
}

/// Startup with no databases fails
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_startup_without_databases() {
    let temp_dir = tempdir().unwrap();
    let service = Service::new(test_config(temp_dir.path()));

    let result = service.serve().await;
    assert!(matches!(
        result,
        Err(ServiceError::Startup(IndexerError::NoDatabases(_)))
    ));
    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(service.local_addr().is_none());
}

/// Startup fails when the listen address is taken
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_startup_bind_failure() {
    let temp_dir = tempdir().unwrap();
    write_links_db(
        temp_dir.path(),
        "core",
        "x86_64",
        &[("zlib-1.2.11-1", "libz.so.1\n")],
    );

    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = ServiceConfig {
        listen_address: taken.local_addr().unwrap().to_string(),
        ..test_config(temp_dir.path())
    };

    let service = Service::new(config);
    let result = service.serve().await;
    assert!(matches!(
        result,
        Err(ServiceError::Listener(HttpError::Bind { .. }))
    ));
    assert_eq!(service.state(), ServiceState::Stopped);
}

/// Shutdown requested before serving stops right after startup
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_before_serve() {
    let temp_dir = tempdir().unwrap();
    write_links_db(
        temp_dir.path(),
        "core",
        "x86_64",
        &[("zlib-1.2.11-1", "libz.so.1\n")],
    );

    let service = Service::new(test_config(temp_dir.path()));
    service.shutdown_handle().shutdown();

    let result = tokio::time::timeout(Duration::from_secs(10), service.serve())
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_eq!(service.store().lookup("libz.so").unwrap(), vec!["zlib"]);
}
