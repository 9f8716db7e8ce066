use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use expect_test::expect;
use tempfile::TempDir;
use tiny_http::{Header, Method, Response, Server};

use crate::{Dependency, Encoding, OpenMode, Path, VfsConfig, VfsRuntime};

fn local_dir(runtime: &VfsRuntime) -> (TempDir, Path) {
    let dir = TempDir::new().unwrap();
    let path = runtime
        .root()
        .lookup(&dir.path().to_string_lossy())
        .unwrap();
    (dir, path)
}

fn runtime_with(configure: impl FnOnce(&mut VfsConfig)) -> VfsRuntime {
    let mut config = VfsConfig::default();
    configure(&mut config);
    VfsRuntime::new(config).unwrap()
}

/// Serves `count` requests, answering each through `handler`.
fn http_server(
    count: usize,
    handler: impl Fn(&mut tiny_http::Request) -> Response<std::io::Cursor<Vec<u8>>> + Send + 'static,
) -> (u16, thread::JoinHandle<()>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let handle = thread::spawn(move || {
        for _ in 0..count {
            let mut request = server.recv().unwrap();
            let response = handler(&mut request);
            request.respond(response).unwrap();
        }
    });
    (port, handle)
}

fn header_value(request: &tiny_http::Request, name: &'static str) -> String {
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv(name))
        .map(|header| header.value.as_str().to_string())
        .unwrap_or_default()
}

#[test]
fn test_local_files_round_trip() {
    let runtime = VfsRuntime::default();
    let (_dir, root) = local_dir(&runtime);
    let file = root.lookup("notes/today.txt").unwrap();
    assert!(!file.exists());
    assert!(file.parent().mkdirs().unwrap());

    let mut out = file.open_write().unwrap();
    out.println("first").unwrap();
    out.print("second\r\nthird").unwrap();
    out.close().unwrap();

    assert!(file.is_file());
    assert_eq!(file.length(), 19);
    let mut input = file.open_read().unwrap();
    assert_eq!(input.read_line().unwrap().as_deref(), Some("first"));
    assert_eq!(input.read_line_no_chop().unwrap().as_deref(), Some("second\r\n"));
    assert!(input.set_position(0).unwrap());
    assert_eq!(input.read_line().unwrap().as_deref(), Some("first"));
    input.close().unwrap();

    let mut append = file.open(OpenMode::Append).unwrap();
    append.print("!").unwrap();
    append.close().unwrap();
    assert_eq!(file.read_to_string().unwrap(), "first\nsecond\r\nthird!");
    assert_eq!(root.lookup("notes").unwrap().list().unwrap(), vec!["today.txt"]);
}

#[test]
fn test_walk_matches_globs() {
    let runtime = VfsRuntime::default();
    let (_dir, root) = local_dir(&runtime);
    root.lookup("src/nested").unwrap().mkdirs().unwrap();
    root.lookup("src/lib.rs").unwrap().write_string("").unwrap();
    root.lookup("src/nested/mod.rs").unwrap().write_string("").unwrap();
    root.lookup("README.md").unwrap().write_string("").unwrap();

    let found: Vec<String> = root
        .walk(&["**/*.rs".to_string()])
        .unwrap()
        .map(|path| path.unwrap().path()[root.path().len()..].to_string())
        .collect();
    assert_eq!(found, vec!["/src/lib.rs", "/src/nested/mod.rs"]);
}

#[test]
fn test_digest_of_files_and_directories() {
    let runtime = VfsRuntime::default();
    let (_dir, root) = local_dir(&runtime);
    let file = root.lookup("a.txt").unwrap();
    file.write_string("abc").unwrap();
    expect![[r#"
        Some(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        )
    "#]]
    .assert_debug_eq(&file.digest());

    let listing_before = root.digest().unwrap();
    root.lookup("b.txt").unwrap().write_string("").unwrap();
    assert_ne!(root.digest().unwrap(), listing_before);
    assert_eq!(root.lookup("missing").unwrap().digest(), None);
}

#[test]
fn test_cached_lookups_are_independent_copies() {
    let runtime = VfsRuntime::default();
    let root = runtime.root();
    let mut first = root.lookup("/var/data/../log").unwrap();
    let second = root.lookup("/var/data/../log").unwrap();
    assert_eq!(first, second);
    assert_eq!(runtime.cache_stats().hits, 1);

    first.set_user_path("renamed");
    assert_eq!(first.user_path(), "renamed");
    assert_eq!(second.user_path(), "/var/data/../log");
    let third = root.lookup("/var/data/../log").unwrap();
    assert_eq!(third.user_path(), "/var/data/../log");
}

#[test]
fn test_cache_evicts_least_recently_used() {
    let runtime = runtime_with(|config| config.cache.capacity = 2);
    let root = runtime.root();
    root.lookup("/a").unwrap();
    root.lookup("/b").unwrap();
    root.lookup("/a").unwrap();
    root.lookup("/c").unwrap();
    let stats = runtime.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.len), (1, 3, 2));

    root.lookup("/b").unwrap();
    assert_eq!(runtime.cache_stats().misses, 4);
    root.lookup("/c").unwrap();
    assert_eq!(runtime.cache_stats().hits, 2);

    runtime.clear_cache();
    assert_eq!(runtime.cache_stats().len, 0);
}

#[test]
fn test_sandboxed_lookups_stay_inside_root() {
    let runtime = VfsRuntime::default();
    let (_dir, root) = local_dir(&runtime);
    let sandbox = root.create_root();
    root.lookup("secret").unwrap().write_string("s").unwrap();

    let inside = sandbox.lookup("/secret").unwrap();
    assert!(inside.exists());
    assert_eq!(inside.url(), root.lookup("secret").unwrap().url());

    let escaped = sandbox.lookup("../../../../secret").unwrap();
    assert_eq!(escaped, inside);
    assert!(!sandbox.lookup("file:/").unwrap().exists());
    assert!(!sandbox.lookup("memory:/").unwrap().exists());
    assert_eq!(runtime.root().lookup("/secret").unwrap().url(), "file:/secret");
}

#[test]
fn test_memory_scheme_through_runtime() {
    let runtime = VfsRuntime::default();
    let dir = runtime.lookup("memory:/cfg").unwrap();
    assert!(dir.mkdir().unwrap());
    let file = dir.lookup("app.toml").unwrap();
    assert_eq!(file.url(), "memory:/cfg/app.toml");
    file.write_string("name = \"x\"").unwrap();

    let same = runtime.memory_root().lookup("cfg/app.toml").unwrap();
    assert_eq!(same.read_to_string().unwrap(), "name = \"x\"");

    let mut stream = same.open_read_write().unwrap();
    assert!(stream.set_position(7).unwrap());
    stream.print("'y'").unwrap();
    stream.flush().unwrap();
    assert_eq!(file.read_to_string().unwrap(), "name = 'y'");

    let mut stream = same.open_read_write().unwrap();
    assert_eq!(stream.read_byte().unwrap(), Some(b'n'));
    stream.print("N").unwrap();
    assert_eq!(stream.read_byte().unwrap(), Some(b'm'));
    stream.close().unwrap();
    assert_eq!(file.read_to_string().unwrap(), "nNme = 'y'");
}

#[test]
fn test_http_get_and_head_through_tiny_http() {
    let (port, server) = http_server(3, |request| {
        // same body for GET and HEAD so the lengths agree
        let body = format!(
            "{} host={} token={}",
            request.url(),
            header_value(request, "Host"),
            header_value(request, "X-Token")
        );
        if request.url().starts_with("/missing") {
            return Response::from_string("nope").with_status_code(404);
        }
        Response::from_string(body).with_header(
            Header::from_bytes(&b"Last-Modified"[..], &b"Wed, 21 Oct 2015 07:28:00 GMT"[..])
                .unwrap(),
        )
    });
    let runtime = VfsRuntime::default();
    let mut attributes = BTreeMap::new();
    attributes.insert("virtual-host".to_string(), "site.test".to_string());
    attributes.insert("X-Token".to_string(), "t0k3n".to_string());
    let page = runtime
        .resolve_with(
            &runtime.root(),
            &format!("http://127.0.0.1:{}/docs/a b?q=1", port),
            &attributes,
        )
        .unwrap();
    assert_eq!(page.url(), format!("http://127.0.0.1:{}/docs/a%20b?q=1", port));

    let text = page.read_to_string().unwrap();
    assert_eq!(text, "/docs/a%20b?q=1 host=site.test token=t0k3n");

    assert!(page.exists());
    assert_eq!(page.length(), 42);
    assert!(page.last_modified().is_some());
    // served from the stat cache
    assert!(page.is_file());

    let missing = page.lookup("/missing").unwrap();
    assert!(!missing.exists());
    server.join().unwrap();
}

#[test]
fn test_http_body_with_utf8_stream_encoding() {
    let (port, server) = http_server(2, |_request| Response::from_string("grüße body"));
    let runtime = runtime_with(|config| config.stream.encoding = Encoding::Utf8);
    let path = runtime
        .root()
        .lookup(&format!("http://127.0.0.1:{}/text", port))
        .unwrap();
    assert_eq!(path.read_to_string().unwrap(), "grüße body");

    let mut stream = path.open_read().unwrap();
    assert_eq!(stream.read_char().unwrap(), Some('g'));
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, "rüße body".as_bytes());
    stream.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_http_post_sends_written_body() {
    let (port, server) = http_server(1, |request| {
        let mut body = String::new();
        request.as_reader().read_to_string(&mut body).unwrap();
        assert_eq!(request.method(), &Method::Post);
        Response::from_string(format!("echo:{}", body))
    });
    let runtime = VfsRuntime::default();
    let path = runtime
        .root()
        .lookup(&format!("http://127.0.0.1:{}/submit", port))
        .unwrap();
    let mut exchange = path.open_read_write().unwrap();
    exchange.print("field=value").unwrap();
    assert_eq!(exchange.read_to_string().unwrap(), "echo:field=value");
    assert_eq!(exchange.attribute("status").unwrap().as_deref(), Some("200"));
    exchange.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_tcp_duplex_flushes_before_reading() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        let n = socket.read(&mut buf).unwrap();
        socket.write_all(&buf[..n]).unwrap();
    });
    let runtime = VfsRuntime::default();
    let path = runtime
        .root()
        .lookup(&format!("tcp://127.0.0.1:{}", port))
        .unwrap();
    assert_eq!(path.port(), Some(port));
    let mut stream = path.open_read_write().unwrap();
    stream.println("ping").unwrap();
    assert_eq!(stream.read_line().unwrap().as_deref(), Some("ping"));
    stream.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_dependency_container_over_local_files() {
    let runtime = runtime_with(|config| config.dependency.check_interval_ms = 0);
    let (_dir, root) = local_dir(&runtime);
    let config = root.lookup("app.toml").unwrap();
    let include = root.lookup("include.toml").unwrap();
    config.write_string("a").unwrap();

    let container = runtime.dependency_container();
    container.add(std::sync::Arc::new(config.create_dependency()));
    container.add(std::sync::Arc::new(include.create_optional_dependency()));
    assert_eq!(container.len(), 2);
    assert!(!container.is_modified());

    config.write_string("ab").unwrap();
    assert!(container.log_modified());
    config.write_string("a").unwrap();
    assert!(container.is_modified());

    container.clear_modified();
    assert!(!container.is_modified());
    include.write_string("x").unwrap();
    assert!(container.is_modified());
}

#[test]
fn test_failing_stat_counts_as_modified() {
    // bind and release a port so nothing is listening on it
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let runtime = VfsRuntime::default();
    let path = runtime
        .root()
        .lookup(&format!("http://127.0.0.1:{}/config", port))
        .unwrap();
    assert!(path.stat().is_err());

    let dependency = path.create_dependency();
    assert!(dependency.is_modified());
    assert!(dependency.log_modified());
    let optional = path.create_optional_dependency();
    assert!(optional.is_modified());
}

#[test]
fn test_unknown_and_malformed_paths() {
    let runtime = VfsRuntime::default();
    let root = runtime.root();
    let unknown = root.lookup("jndi:/comp/env").unwrap();
    assert!(!unknown.exists());
    assert!(!unknown.is_file());
    assert!(!unknown.can_read());

    let error = root.lookup("http://").unwrap_err();
    expect!["Cannot resolve 'http://': bad host"].assert_eq(&error.to_string());
}
