//! 集成测试公用设施：在临时目录中搭建一个小型构建产物，
//! 并在随机端口上以进程内方式启动服务器。

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use sheetserver::{config::Config, server::Server};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const NOTES: &[&str] = &[
    "notes/index.html",
    "notes/python-basic.html",
    "notes/python-asyncio.html",
    "notes/rust-ownership.html",
];

pub struct TestServer {
    pub addr: SocketAddr,
    pub root: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// 只发送停机信号，不等待服务器退出。
    pub fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// 发送停机信号并等待主循环退出，返回是否在 `limit` 内退出。
    pub async fn stop_within(mut self, limit: Duration) -> bool {
        self.signal_shutdown();
        tokio::time::timeout(limit, self.handle).await.is_ok()
    }

    pub async fn stop(self) {
        self.stop_within(Duration::from_secs(10)).await;
    }
}

/// 模拟文档生成器的 HTML 输出
pub fn build_tree(root: &Path) {
    let mut files: Vec<(&str, String)> = vec![
        ("index.html", "<html><body>cheatsheet</body></html>".to_string()),
        ("genindex.html", "<html>index</html>".to_string()),
        ("search.html", "<html>search</html>".to_string()),
        ("_static/basic.css", "body { margin: 0 }".repeat(64)),
        ("_static/logo.png", "\u{89}PNG fake".to_string()),
    ];
    for note in NOTES {
        files.push((note, format!("<html><body>{}</body></html>", note).repeat(20)));
    }
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::from_toml_str("read_timeout_secs = 1").unwrap();
    config.set_build_root(root);
    config.set_site_url("https://cheatsheet.example.org");
    config.set_port(0);
    config
}

pub async fn spawn() -> TestServer {
    spawn_with(|_| {}).await
}

pub async fn spawn_with<F: FnOnce(&mut Config)>(tweak: F) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    build_tree(root.path());
    let mut config = test_config(root.path());
    tweak(&mut config);

    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async move {
        let _ = rx.await;
    }));
    TestServer {
        addr,
        root,
        shutdown: Some(tx),
        handle,
    }
}

/// 发送原始请求并读取到服务端关闭连接为止。
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Result<Vec<u8>, String> {
    let mut stream = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
    stream.write_all(request).await.map_err(|e| e.to_string())?;
    let mut buffer = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buffer))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
    Ok(buffer)
}

pub async fn get(addr: SocketAddr, path: &str) -> Response {
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
    parse_response(&send_raw(addr, request.as_bytes()).await.unwrap())
}

pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

pub fn parse_response(raw: &[u8]) -> Response {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    // 解析状态行
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    // 解析头部
    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Response {
        status,
        headers,
        body,
    }
}
