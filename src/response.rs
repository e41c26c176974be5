use crate::{
    cache::FileCache,
    config::Config,
    exception::Exception,
    param::*,
    request::Request,
    util::{format_file_size, http_date, truncate_to_secs, weak_etag, HtmlBuilder},
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error, warn};

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// 响应体。大文件与范围请求以文件片段的形式交给连接层分块发送。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Empty,
    Bytes(Bytes),
    File { path: PathBuf, offset: u64, len: u64 },
}

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    accept_ranges: bool,
    content_range: Option<String>,
    etag: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    cache_control: Option<String>,
    vary_encoding: bool,
    body: Body,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            allow: None,
            accept_ranges: false,
            content_range: None,
            etag: None,
            last_modified: None,
            cache_control: None,
            vary_encoding: false,
            body: Body::Empty,
        }
    }

    /// 构建静态文件响应，处理条件请求、范围请求、压缩与缓存。
    pub fn from_file(
        path: &Path,
        request: &Request,
        id: u128,
        cache: &Arc<Mutex<FileCache>>,
        config: &Config,
    ) -> Result<Self, Exception> {
        let metadata = fs::metadata(path).map_err(|e| {
            error!("[ID{}]无法获取文件{}的元数据: {}", id, path.display(), e);
            Exception::IoFailed
        })?;
        let file_size = metadata.len();
        let modified = metadata.modified().map_err(|e| {
            error!("[ID{}]无法获取文件{}的修改时间: {}", id, path.display(), e);
            Exception::IoFailed
        })?;

        let mime = get_mime(path);
        let etag = weak_etag(file_size, modified);
        let last_modified = truncate_to_secs(modified);
        debug!(
            "[ID{}]文件: {}, 大小: {}, MIME: {}",
            id,
            path.display(),
            format_file_size(file_size),
            mime
        );

        let mut response = Self::new();
        response.etag = Some(etag.clone());
        response.last_modified = Some(last_modified);
        response.cache_control = Some(format!("public, max-age={}", config.cache_max_age()));
        response.accept_ranges = config.enable_range_requests();

        if is_not_modified(request, &etag, &last_modified) {
            debug!("[ID{}]条件请求命中，返回304", id);
            response.set_code(304);
            return Ok(response);
        }

        if let Some(range) = request.range().filter(|_| config.enable_range_requests()) {
            return Ok(match range.resolve(file_size) {
                Some((start, end)) => {
                    let len = end - start + 1;
                    debug!("[ID{}]处理Range请求: bytes {}-{}/{}", id, start, end, file_size);
                    response.set_code(206);
                    response.content_range =
                        Some(format!("bytes {}-{}/{}", start, end, file_size));
                    response.content_type = Some(mime.to_string());
                    response.content_length = len;
                    response.body = Body::File {
                        path: path.to_path_buf(),
                        offset: start,
                        len,
                    };
                    response
                }
                None => {
                    warn!("[ID{}]无效的Range请求: {:?}, file_size={}", id, range, file_size);
                    response.set_code(416);
                    response.content_range = Some(format!("bytes */{}", file_size));
                    response.content_type = Some("text/html;charset=utf-8".to_string());
                    response.cache_control = Some("no-store".to_string());
                    response.set_body(Bytes::from(HtmlBuilder::from_status_code(416, None).build()));
                    response
                }
            });
        }

        response.content_type = Some(mime.to_string());

        if file_size > config.streaming_threshold() {
            debug!("[ID{}]文件超过流式阈值，使用分块发送", id);
            response.content_length = file_size;
            response.body = Body::File {
                path: path.to_path_buf(),
                offset: 0,
                len: file_size,
            };
            return Ok(response);
        }

        let cache_key = path.to_string_lossy();
        let cached = lock_cache(cache, id).find(&cache_key, modified);
        let contents = match cached {
            Some(bytes) => {
                debug!("[ID{}]缓存命中，原始大小: {} bytes", id, bytes.len());
                bytes
            }
            None => {
                debug!("[ID{}]缓存未命中或文件已修改，读取文件", id);
                let bytes = Bytes::from(fs::read(path).map_err(|e| {
                    error!("[ID{}]无法读取文件{}: {}", id, path.display(), e);
                    Exception::IoFailed
                })?);
                if FileCache::should_cache(file_size, config.streaming_threshold()) {
                    lock_cache(cache, id).push(&cache_key, bytes.clone(), modified);
                }
                bytes
            }
        };

        if should_skip_compression(mime) {
            response.set_body(contents);
        } else {
            response.vary_encoding = true;
            response.set_compressed_body(contents, request.accept_encoding(), id);
        }
        Ok(response)
    }

    /// 生成一个小型 HTML 错误页。
    pub fn from_status_code(code: u16, request: &Request, id: u128) -> Self {
        let note = match code {
            400 => Some("The request could not be understood."),
            404 => Some("This page is not part of the cheatsheet."),
            405 => Some("Only GET, HEAD and OPTIONS are served here."),
            500 => Some("The server hit an internal error."),
            _ => None,
        };
        let html = HtmlBuilder::from_status_code(code, note).build();
        let mut response = Self::from_text(code, html, "text/html;charset=utf-8", request, id);
        response.cache_control = Some("no-store".to_string());
        response
    }

    /// 无法解析请求时使用，此时没有可协商的编码。
    pub fn from_exception(exception: Exception) -> Self {
        let code = exception.status_code();
        let html = HtmlBuilder::from_status_code(code, Some(&exception.to_string())).build();
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some("text/html;charset=utf-8".to_string());
        response.set_body(Bytes::from(html));
        response
    }

    /// 内存中生成的正文（站点地图、健康检查、ACME 应答）。
    pub fn from_text<B: Into<Bytes>>(
        code: u16,
        content: B,
        content_type: &str,
        request: &Request,
        id: u128,
    ) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some(content_type.to_string());
        response.vary_encoding = true;
        response.set_compressed_body(content.into(), request.accept_encoding(), id);
        response
    }

    pub fn options() -> Self {
        let mut response = Self::new();
        response.set_code(204);
        response.allow = Some(ALLOWED_METHODS.to_vec());
        response
    }

    pub fn method_not_allowed(request: &Request, id: u128) -> Self {
        let mut response = Self::from_status_code(405, request, id);
        response.allow = Some(ALLOWED_METHODS.to_vec());
        response
    }

    /// HEAD 请求：保留 GET 的全部头部，丢弃正文。
    pub fn head_only(mut self) -> Self {
        self.body = Body::Empty;
        self
    }

    pub fn with_cache_control(mut self, value: &str) -> Self {
        self.cache_control = Some(value.to_string());
        self
    }

    fn set_body(&mut self, bytes: Bytes) {
        self.content_length = bytes.len() as u64;
        self.body = Body::Bytes(bytes);
    }

    fn set_compressed_body(&mut self, bytes: Bytes, accept_encoding: &[HttpEncoding], id: u128) {
        let encoding = decide_encoding(accept_encoding);
        if encoding.is_none() {
            self.set_body(bytes);
            return;
        }
        match compress(&bytes, encoding) {
            Ok(compressed) => {
                debug!(
                    "[ID{}]{:?}压缩: {} -> {} bytes",
                    id,
                    encoding,
                    bytes.len(),
                    compressed.len()
                );
                self.content_encoding = encoding;
                self.set_body(Bytes::from(compressed));
            }
            Err(e) => {
                error!("[ID{}]压缩失败: {}，返回未压缩内容", id, e);
                self.content_encoding = None;
                self.set_body(bytes);
            }
        }
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&reason) => reason.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    /// 状态行与全部响应头，以空行结尾。
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = format!("{} {} {}{}", self.version, self.status_code, self.information, CRLF);
        let mut header = |name: &str, value: &str| {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str(CRLF);
        };
        if let Some(t) = &self.content_type {
            header("Content-Type", t);
        }
        if let Some(e) = self.content_encoding {
            header("Content-Encoding", &e.to_string());
        }
        // 204 与 304 不带 Content-Length
        if !matches!(self.status_code, 204 | 304) {
            header("Content-Length", &self.content_length.to_string());
        }
        header("Date", &http_date(&self.date));
        header("Server", &self.server_name);
        if let Some(a) = &self.allow {
            let methods: Vec<String> = a.iter().map(|m| m.to_string()).collect();
            header("Allow", &methods.join(", "));
        }
        if self.accept_ranges {
            header("Accept-Ranges", "bytes");
        }
        if let Some(r) = &self.content_range {
            header("Content-Range", r);
        }
        if let Some(tag) = &self.etag {
            header("ETag", tag);
        }
        if let Some(lm) = &self.last_modified {
            header("Last-Modified", &http_date(lm));
        }
        if let Some(cc) = &self.cache_control {
            header("Cache-Control", cc);
        }
        if self.vary_encoding {
            header("Vary", "Accept-Encoding");
        }
        header("Connection", "close");
        head.push_str(CRLF);
        head.into_bytes()
    }

    /// 头部加内存正文。`Body::File` 的内容由连接层另行发送。
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = self.head_bytes();
        if let Body::Bytes(b) = &self.body {
            bytes.extend_from_slice(b);
        }
        bytes
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::File { .. })
    }
}

fn lock_cache(cache: &Arc<Mutex<FileCache>>, id: u128) -> std::sync::MutexGuard<'_, FileCache> {
    match cache.lock() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("[ID{}]缓存锁被污染，恢复并继续", id);
            poisoned.into_inner()
        }
    }
}

/// `If-None-Match` 优先；只有它缺席时才看 `If-Modified-Since`。
fn is_not_modified(request: &Request, etag: &str, last_modified: &DateTime<Utc>) -> bool {
    if let Some(candidates) = request.if_none_match() {
        let ours = etag.trim_start_matches("W/");
        return candidates
            .split(',')
            .map(str::trim)
            .any(|c| c == "*" || c.trim_start_matches("W/") == ours);
    }
    match request.if_modified_since() {
        Some(since) => *last_modified <= since,
        None => false,
    }
}

fn compress(data: &[u8], mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data.to_vec()),
    }
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/x-icon",
        "application/zip",
        "application/gzip",
        "application/pdf",
        "application/epub+zip",
        "application/octet-stream",
        "font/woff",
        "font/woff2",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Br, HttpEncoding::Gzip, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}

fn get_mime(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|e| MIME_TYPES.get(e.as_str()).copied())
        .unwrap_or("application/octet-stream")
}
