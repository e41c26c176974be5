// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 异步 Web 服务器
//!
//! 基于 Tokio 的静态文档服务器。每个连接处理一个请求后关闭：
//! - 读取请求头（带超时与大小上限）
//! - 解析为 [`Request`] 并交给 [`dispatch`] 路由
//! - 小文件一次性写出，大文件与范围请求按 `chunk_size` 分块写出
//!
//! 停机时先停止接受新连接，再在宽限期内等待已有连接处理完毕。

use std::future::Future;
use std::io::{self, ErrorKind, SeekFrom};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::{
    fs::File as TokioFile,
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time::{timeout, timeout_at},
};

use crate::{
    acme,
    cache::FileCache,
    config::Config,
    exception::Exception,
    param::*,
    request::{find_head_end, Request},
    response::{Body, Response},
    router::{self, Route},
    sitemap::Sitemap,
};

/// 停机时等待在途连接的最长时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// 拒绝请求后继续读取并丢弃客户端数据的时间与字节上限
const LINGER_TIME: Duration = Duration::from_secs(1);
const LINGER_BYTES: usize = 64 * 1024;

/// 所有连接共享的只读状态与缓存。
pub struct State {
    config: Arc<Config>,
    cache: Arc<Mutex<FileCache>>,
    sitemap: Sitemap,
    started: Instant,
}

impl State {
    pub fn new(config: Config) -> Result<Self, Exception> {
        let sitemap = Sitemap::from_config(&config)?;
        let cache = FileCache::from_capacity(config.cache_size());
        Ok(Self {
            config: Arc::new(config),
            cache: Arc::new(Mutex::new(cache)),
            sitemap,
            started: Instant::now(),
        })
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<State>,
}

impl Server {
    /// 按配置绑定监听地址。`local` 为真时只监听回环地址。
    pub async fn bind(config: Config) -> Result<Self, Exception> {
        let address = match config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        let socket = SocketAddrV4::new(address, config.port());
        let root = config.build_root();
        if !root.join(INDEX_FILE).is_file() {
            warn!("{}下没有{}，请先执行build命令", root.display(), INDEX_FILE);
        }
        let state = State::new(config)?;
        let listener = match TcpListener::bind(socket).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定地址：{}，错误：{}", socket, e);
                return Err(Exception::BindFailed);
            }
        };
        info!("服务端将在{}上监听Socket连接", socket);
        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    /// 实际监听地址，端口为0时由系统分配。
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 运行主循环，直到 `shutdown` 完成。
    ///
    /// 停机时立即关闭监听套接字，随后最多等待 [`SHUTDOWN_GRACE`] 让在途连接完成。
    pub async fn run_until<F: Future<Output = ()>>(self, shutdown: F) {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();
        let mut id: u128 = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("主循环接收到停机指令，正在退出...");
                    break;
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("连接任务异常退出: {}", e);
                    }
                }
                accepted = listener.accept() => {
                    let (mut stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("接受连接失败：{}", e);
                            continue;
                        }
                    };
                    debug!("[ID{}]新的连接：{}", id, addr);
                    let state = Arc::clone(&state);
                    connections.spawn(async move {
                        handle_connection(&mut stream, id, &state).await;
                    });
                    id += 1;
                }
            }
        }

        drop(listener);
        if !connections.is_empty() {
            info!("已停止接受连接，等待{}个连接处理完毕", connections.len());
        }
        let drained = timeout(SHUTDOWN_GRACE, async {
            while let Some(finished) = connections.join_next().await {
                if let Err(e) = finished {
                    error!("连接任务异常退出: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("宽限期结束，仍有{}个连接未完成", connections.len());
            connections.shutdown().await;
        }
        info!("服务器已停止");
    }
}

/// Ctrl-C 或 SIGTERM。
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C：{}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("无法监听SIGTERM：{}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// 读取请求头直到空行。连接在此之前关闭或超时返回 `Ok(None)`。
async fn read_head(
    stream: &mut TcpStream,
    id: u128,
    read_timeout: Duration,
) -> Result<Option<Vec<u8>>, Exception> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = match timeout(read_timeout, stream.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                return Ok(None);
            }
            Err(_) => {
                debug!("[ID{}]读取请求超时，关闭连接", id);
                return Ok(None);
            }
        };
        if n == 0 {
            // 客户端主动关闭连接
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
        if find_head_end(&buffer).is_some() {
            return Ok(Some(buffer));
        }
        if buffer.len() >= MAX_REQUEST_HEAD {
            return Err(Exception::RequestTooLarge);
        }
    }
}

/// # 连接处理器
///
/// 负责单个 TCP 流的生命周期：读取解析请求、路由、发送响应。
async fn handle_connection(stream: &mut TcpStream, id: u128, state: &State) {
    let read_timeout = Duration::from_secs(state.config.read_timeout_secs());
    let parsed = match read_head(stream, id, read_timeout).await {
        Ok(Some(buffer)) => Request::try_from(&buffer, id),
        Ok(None) => return,
        Err(e) => Err(e),
    };
    debug!("[ID{}]HTTP请求接收完毕", id);

    let start_time = Instant::now();
    let request = match parsed {
        Ok(req) => req,
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败: {}", id, e);
            let response = Response::from_exception(e);
            info!("{}", access_line(id, None, &response));
            if let Err(e) = reject(stream, &response).await {
                debug!("[ID{}]发送错误响应失败: {}", id, e);
            }
            return;
        }
    };

    let response = dispatch(&request, id, state);
    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );

    info!("{}", access_line(id, Some(&request), &response));

    if let Err(e) = write_response(stream, &response, id, state.config.chunk_size()).await {
        debug!("[ID{}]发送响应失败: {}", id, e);
    }
}

/// 访问日志行。请求无法解析时，相应字段记为 `-`。
fn access_line(id: u128, request: Option<&Request>, response: &Response) -> String {
    match request {
        Some(r) => format!(
            "[ID{}] {}, {}, {}, {}, {}, {}",
            id,
            r.version(),
            r.path(),
            r.method(),
            response.status_code(),
            response.information(),
            r.user_agent(),
        ),
        None => format!(
            "[ID{}] -, -, -, {}, {}, -",
            id,
            response.status_code(),
            response.information(),
        ),
    }
}

/// 发送错误响应后半关闭写端，再读取并丢弃客户端未发完的数据。
/// 带着未读数据关闭套接字会让内核发送 RST，客户端就收不到这个响应。
async fn reject<S>(stream: &mut S, response: &Response) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    let deadline = tokio::time::Instant::now() + LINGER_TIME;
    let mut sink = [0u8; 1024];
    let mut discarded = 0;
    while discarded < LINGER_BYTES {
        match timeout_at(deadline, stream.read(&mut sink)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => discarded += n,
        }
    }
    Ok(())
}

/// 将请求映射为响应。纯同步逻辑，便于测试。
pub fn dispatch(request: &Request, id: u128, state: &State) -> Response {
    let method = request.method();
    if method == HttpRequestMethod::Options {
        return Response::options();
    }
    if !method.is_allowed() {
        return Response::method_not_allowed(request, id);
    }

    let response = match router::resolve(request.path(), state.config.build_root()) {
        Ok(Route::Asset(path)) => {
            match Response::from_file(&path, request, id, &state.cache, &state.config) {
                Ok(r) => r,
                Err(e) => Response::from_status_code(e.status_code(), request, id),
            }
        }
        Ok(Route::Sitemap) => match state.sitemap.render() {
            Ok(xml) => Response::from_text(200, xml, "application/xml", request, id)
                .with_cache_control("no-cache"),
            Err(e) => {
                error!("[ID{}]生成站点地图失败: {}", id, e);
                Response::from_status_code(500, request, id)
            }
        },
        Ok(Route::Health) => {
            let body = serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": state.started.elapsed().as_secs(),
            });
            Response::from_text(200, body.to_string(), "application/json", request, id)
                .with_cache_control("no-store")
        }
        Ok(Route::AcmeChallenge(token)) => match acme::find_key_in_env(&token) {
            Some(key) => {
                info!("[ID{}]应答ACME验证", id);
                Response::from_text(200, key, "text/plain", request, id)
                    .with_cache_control("no-store")
            }
            None => {
                warn!("[ID{}]未配置的ACME令牌：{}", id, token);
                Response::from_status_code(404, request, id)
            }
        },
        Err(Exception::FileNotFound) => {
            warn!("[ID{}]请求的路径：{} 不存在，返回404", id, request.path());
            Response::from_status_code(404, request, id)
        }
        Err(e) => {
            warn!("[ID{}]请求的路径：{} 无效（{}）", id, request.path(), e);
            Response::from_status_code(e.status_code(), request, id)
        }
    };

    match method {
        HttpRequestMethod::Head => response.head_only(),
        _ => response,
    }
}

async fn write_response(
    stream: &mut TcpStream,
    response: &Response,
    id: u128,
    chunk_size: usize,
) -> io::Result<()> {
    match response.body() {
        Body::File { path, offset, len } => {
            debug!("[ID{}]使用流式传输模式发送文件", id);
            stream.write_all(&response.head_bytes()).await?;
            let sent = stream_file(stream, path, *offset, *len, chunk_size).await?;
            debug!("[ID{}]流式传输完成，共发送 {} 字节", id, sent);
        }
        _ => {
            let bytes = response.as_bytes();
            debug!("[ID{}]发送全量响应，长度: {}", id, bytes.len());
            stream.write_all(&bytes).await?;
        }
    }
    stream.flush().await
}

async fn stream_file<W: AsyncWrite + Unpin>(
    stream: &mut W,
    path: &Path,
    offset: u64,
    len: u64,
    chunk_size: usize,
) -> io::Result<u64> {
    let mut file = TokioFile::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; chunk_size];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(chunk_size as u64) as usize;
        let n = file.read(&mut buffer[..want]).await?;
        if n == 0 {
            // 响应头已经承诺了 len 字节
            warn!(
                "文件{}在发送过程中被截断，已发送{}/{}字节",
                path.display(),
                len - remaining,
                len
            );
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "file truncated while streaming"));
        }
        stream.write_all(&buffer[..n]).await?;
        remaining -= n as u64;
    }
    Ok(len)
}
