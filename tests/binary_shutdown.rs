//! Process-level shutdown of the server binary.

mod common;

use std::process::Stdio;
use std::time::Duration;

use common::{http_client, properties_body, start_mock_upstream};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn wait_until_healthy(base: &str) {
    let client = http_client();
    for _ in 0..100 {
        if let Ok(res) = client.get(format!("{base}/health")).send().await {
            if res.status() == 200 {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server never became healthy");
}

#[tokio::test]
async fn test_process_exits_after_shutdown_with_stdin_open() {
    let upstream = start_mock_upstream(|_, _| (200, properties_body())).await;
    let port = free_port();

    let mut child = Command::new(env!("CARGO_BIN_EXE_bitbucket-mcp-server"))
        .arg("--port")
        .arg(port.to_string())
        .env_remove("MCP_CONFIG")
        .env("BITBUCKET_URL", upstream.url())
        .env("LOG_LEVEL", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    // Held open for the whole test: the process must not wait for EOF.
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap()).lines();

    let base = format!("http://127.0.0.1:{port}");
    wait_until_healthy(&base).await;

    stdin
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
        .await
        .unwrap();
    let line = tokio::time::timeout(Duration::from_secs(5), stdout.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let pong: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(pong["id"], 1);

    let res = http_client()
        .post(format!("{base}/shutdown"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 202);

    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("process kept running after shutdown")
        .unwrap();
    assert!(status.success());
    drop(stdin);
}
