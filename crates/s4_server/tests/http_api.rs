//! End-to-end tests over the HTTP surface, on a real listener.
//!
//! A single-node cluster on 127.0.0.1 owns every key, so ownership
//! checks pass and the interesting paths (slot reservation, conflict,
//! shedding, listing, eval, map failure shapes) can be driven with
//! plain requests. Transfers that need live `send`/`recv` helpers are
//! exercised up to the handshake; a bogus confirm must release the
//! slot either way.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use s4_protocol::{keys, ClusterConfig, ListEntry, ServerAddr, Settings};
use s4_server::node::Node;

async fn spawn_server() -> (Arc<Node>, String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = ClusterConfig::from_servers(vec![ServerAddr {
        host: "127.0.0.1".to_string(),
        port: 0,
    }]);
    let settings = Settings {
        timeout: Duration::from_secs(2),
        io_jobs: 4,
        cpu_jobs: 2,
    };
    let node = Node::new(config, settings, dir.path().join("s4_data")).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = s4_server::http::router(Arc::clone(&node));
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (node, format!("http://{}", addr), dir)
}

/// Seed a committed blob directly on disk.
fn seed_blob(root: &Path, rel: &str, contents: &[u8]) {
    let blob = root.join(rel);
    std::fs::create_dir_all(blob.parent().unwrap()).unwrap();
    std::fs::write(&blob, contents).unwrap();
    std::fs::write(keys::sidecar_path(&blob), s4_xfer::hash_bytes(contents)).unwrap();
}

fn b64(cmd: &str) -> String {
    BASE64.encode(cmd)
}

#[tokio::test]
async fn test_health() {
    let (_node, base, _dir) = spawn_server().await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn test_list_and_list_buckets() {
    let (node, base, _dir) = spawn_server().await;
    seed_blob(&node.data_root, "b/x/one", b"1\n");
    seed_blob(&node.data_root, "b/top", b"abc\n");

    let rows: Vec<ListEntry> = reqwest::get(format!(
        "{}/list?prefix=s4://b/&recursive=true",
        base
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let paths: Vec<_> = rows.iter().map(|r| r.path().to_string()).collect();
    assert_eq!(paths, vec!["top", "x/one"]);

    let rows: Vec<ListEntry> = reqwest::get(format!("{}/list?prefix=s4://b/", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.is_prefix() && r.path() == "x/"));

    let rows: Vec<ListEntry> = reqwest::get(format!("{}/list_buckets", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.path().to_string()).collect();
    assert_eq!(names, vec!["b"]);
}

#[tokio::test]
async fn test_delete_key_and_recursive_prefix() {
    let (node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    seed_blob(&node.data_root, "b/job/000", b"a");
    seed_blob(&node.data_root, "b/job/001", b"b");
    seed_blob(&node.data_root, "b/keep", b"c");

    let resp = client
        .post(format!("{}/delete?prefix=s4://b/job/000", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(!node.data_root.join("b/job/000").exists());
    assert!(!node.data_root.join("b/job/000.xxh3").exists());

    let resp = client
        .post(format!("{}/delete?prefix=s4://b/job/&recursive=true", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(!node.data_root.join("b/job").exists());
    assert!(node.data_root.join("b/keep").exists());

    // deleting something absent is still 200
    let resp = client
        .post(format!("{}/delete?prefix=s4://b/job/000", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn test_delete_refuses_escaping_prefix() {
    let (_node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/delete?prefix=s4://b/../x&recursive=true", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409);
}

#[tokio::test]
async fn test_prepare_put_reserves_then_conflicts_then_releases() {
    let (node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/prepare_put?key=s4://b/k", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let (uuid, port): (String, u16) = resp.json().await.unwrap();
    assert!((20_000..60_000).contains(&port));
    assert!(node.data_root.join("b/k.xxh3").exists());

    // the slot is held: a second prepare of the same key conflicts
    let resp = client
        .post(format!("{}/prepare_put?key=s4://b/k", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409);

    // nudge the copier to completion if a listener is actually up
    let _ = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;

    // a confirm with the wrong digest fails and frees the slot
    let resp = client
        .post(format!(
            "{}/confirm_put?uuid={}&checksum=deadbeefdeadbeef",
            base, uuid
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    assert!(!node.data_root.join("b/k").exists());
    assert!(!node.data_root.join("b/k.xxh3").exists());

    let resp = client
        .post(format!("{}/prepare_put?key=s4://b/k", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn test_prepare_put_rejects_existing_key_and_bad_keys() {
    let (node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    seed_blob(&node.data_root, "b/existing", b"v");

    for key in [
        "s4://b/existing",
        "s4://_reserved/k",
        "s4://b/has%20space",
    ] {
        let resp = client
            .post(format!("{}/prepare_put?key={}", base, key))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 409, "key: {}", key);
    }
}

#[tokio::test]
async fn test_confirm_with_unknown_uuid_is_404() {
    let (_node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!(
            "{}/confirm_put?uuid=no-such-transfer&checksum=deadbeefdeadbeef",
            base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let resp = client
        .post(format!(
            "{}/confirm_get?uuid=no-such-transfer&checksum=deadbeefdeadbeef",
            base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn test_prepare_get_missing_key_is_404() {
    let (_node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/prepare_get?key=s4://b/nope&port=29999", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn test_eval_streams_the_blob() {
    let (node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    seed_blob(&node.data_root, "b/nums", b"1\n2\n3\n");

    let resp = client
        .post(format!(
            "{}/eval?key=s4://b/nums&b64cmd={}",
            base,
            b64("head -n 2")
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "1\n2");
}

#[tokio::test]
async fn test_eval_missing_key_and_failing_cmd() {
    let (node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!(
            "{}/eval?key=s4://b/nope&b64cmd={}",
            base,
            b64("cat")
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    seed_blob(&node.data_root, "b/data", b"x\n");
    let resp = client
        .post(format!(
            "{}/eval?key=s4://b/data&b64cmd={}",
            base,
            b64("exit 9")
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let out: s4_protocol::CmdOutput = resp.json().await.unwrap();
    assert_eq!(out.exitcode, 9);
}

#[tokio::test]
async fn test_map_failing_user_cmd_returns_the_triple() {
    let (node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    seed_blob(&node.data_root, "b/in/000", b"1\n");

    let resp = client
        .post(format!("{}/map?b64cmd={}", base, b64("echo bad >&2; exit 2")))
        .json(&vec![("s4://b/in/000", "s4://b/out/000")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let out: s4_protocol::CmdOutput = resp.json().await.unwrap();
    assert_eq!(out.exitcode, 2);
    assert_eq!(out.stderr, "bad");
}

#[tokio::test]
async fn test_map_from_n_failing_user_cmd() {
    let (node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    seed_blob(&node.data_root, "b/mid/a/0000", b"1\n");
    seed_blob(&node.data_root, "b/mid/b/0000", b"2\n");

    let resp = client
        .post(format!(
            "{}/map_from_n?outdir=s4://b/out/&b64cmd={}",
            base,
            b64("false")
        ))
        .json(&vec!["s4://b/mid/a/0000", "s4://b/mid/b/0000"])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let out: s4_protocol::CmdOutput = resp.json().await.unwrap();
    assert_ne!(out.exitcode, 0);
}

#[tokio::test]
async fn test_map_rejects_bad_b64() {
    let (_node, base, _dir) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/map?b64cmd=!!!", base))
        .json(&Vec::<(String, String)>::new())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}
