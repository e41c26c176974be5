// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 将从 TCP 流中读取的请求头字节解析为强类型的 `Request`。覆盖：
//! 1. 请求行（方法、目标路径、版本）。
//! 2. 静态资源层关心的标头：`User-Agent`、`Accept`、`Accept-Encoding`。
//! 3. 范围请求 `Range`。
//! 4. 条件请求 `If-None-Match` / `If-Modified-Since`。
//!
//! 请求体一律忽略：静态站点不接收任何提交数据。

use crate::{exception::Exception, param::*, util::parse_http_date};
use chrono::{DateTime, Utc};
use log::error;

/// `Range: bytes=...` 的单一区间形式。多区间请求只取第一个区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-` 或 `bytes=start-end`
    FromTo(u64, Option<u64>),
    /// `bytes=-n`，即文件最后 n 个字节
    Suffix(u64),
}

impl ByteRange {
    /// 针对给定文件大小求出闭区间 `(start, end)`。区间不可满足时返回 `None`。
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        match *self {
            ByteRange::FromTo(start, end) => {
                if start >= size {
                    return None;
                }
                let end = end.map_or(size - 1, |e| e.min(size - 1));
                if start > end {
                    None
                } else {
                    Some((start, end))
                }
            }
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(n) => Some((size.saturating_sub(n), size - 1)),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?;
        let first = spec.split(',').next()?.trim();
        let (start, end) = first.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        if start.is_empty() {
            return end.parse::<u64>().ok().map(ByteRange::Suffix);
        }
        let start = start.parse::<u64>().ok()?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse::<u64>().ok()?)
        };
        Some(ByteRange::FromTo(start, end))
    }
}

/// 一个 HTTP 请求的元数据。
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpRequestMethod,
    /// 原始请求目标，包含查询字符串，尚未做百分号解码
    path: String,
    version: HttpVersion,
    user_agent: String,
    /// 客户端接受的压缩编码，`q=0` 的编码不会出现在这里
    accept_encoding: Vec<HttpEncoding>,
    range: Option<ByteRange>,
    if_none_match: Option<String>,
    if_modified_since: Option<DateTime<Utc>>,
}

impl Request {
    /// 从原始字节构建 `Request`。
    ///
    /// `buffer` 可以包含请求体或尾随数据，解析在第一个空行处停止。
    /// `id` 仅用于日志追踪。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let head_len = find_head_end(buffer).unwrap_or(buffer.len());
        let head = match std::str::from_utf8(&buffer[..head_len]) {
            Ok(s) => s,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut lines = head.split(CRLF);
        let request_line = lines.next().unwrap_or("");
        let parts: Vec<&str> = request_line.split(' ').filter(|p| !p.is_empty()).collect();
        if parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequest);
        }

        let method_str = parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            "PUT" => HttpRequestMethod::Put,
            "DELETE" => HttpRequestMethod::Delete,
            "PATCH" => HttpRequestMethod::Patch,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = parts[parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 不规范的客户端会在路径中带空格，这里拼回去
        let path = parts[1..parts.len() - 1].join(" ");

        let mut request = Self {
            method,
            path,
            version,
            user_agent: String::new(),
            accept_encoding: vec![],
            range: None,
            if_none_match: None,
            if_modified_since: None,
        };

        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = match line.split_once(':') {
                Some((n, v)) => (n.trim().to_ascii_lowercase(), v.trim()),
                None => continue,
            };
            match name.as_str() {
                "user-agent" => request.user_agent = value.to_string(),
                "accept-encoding" => request.accept_encoding = parse_accept_encoding(value),
                "range" => request.range = ByteRange::parse(value),
                "if-none-match" => request.if_none_match = Some(value.to_string()),
                "if-modified-since" => request.if_modified_since = parse_http_date(value),
                _ => {}
            }
        }

        Ok(request)
    }
}

/// 请求头结束位置（不含 `\r\n\r\n`）。
pub fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_accept_encoding(value: &str) -> Vec<HttpEncoding> {
    let mut encodings = vec![];
    for item in value.split(',') {
        let mut params = item.split(';');
        let token = params.next().unwrap_or("").trim().to_ascii_lowercase();
        let refused = params.any(|p| {
            let p = p.trim();
            p.strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .map_or(false, |q| q <= 0.0)
        });
        if refused {
            continue;
        }
        let encoding = match token.as_str() {
            "gzip" | "x-gzip" => HttpEncoding::Gzip,
            "deflate" => HttpEncoding::Deflate,
            "br" => HttpEncoding::Br,
            _ => continue,
        };
        if !encodings.contains(&encoding) {
            encodings.push(encoding);
        }
    }
    encodings
}

impl Request {
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 原始请求目标（含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn if_none_match(&self) -> Option<&str> {
        self.if_none_match.as_deref()
    }

    pub fn if_modified_since(&self) -> Option<DateTime<Utc>> {
        self.if_modified_since
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(raw: &str) -> Result<Request, Exception> {
        Request::try_from(raw.as_bytes(), 0)
    }

    #[test]
    fn test_parse_get_request() {
        let request = parse(
            "GET / HTTP/1.1\r\nHost: localhost:5000\r\nUser-Agent: Test-Browser\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n",
        )
        .unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.path(), "/");
        assert_eq!(request.version(), HttpVersion::V1_1);
        assert_eq!(request.user_agent(), "Test-Browser");
        assert_eq!(
            request.accept_encoding(),
            &[HttpEncoding::Gzip, HttpEncoding::Deflate, HttpEncoding::Br]
        );
    }

    #[test]
    fn test_parse_head_and_options() {
        let head = parse("HEAD /notes/basic.html HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.method(), HttpRequestMethod::Head);
        assert_eq!(head.path(), "/notes/basic.html");

        let options = parse("OPTIONS * HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        assert_eq!(options.method(), HttpRequestMethod::Options);
        assert_eq!(options.path(), "*");
    }

    #[test]
    fn test_unused_headers_are_ignored() {
        let request = parse(
            "GET /notes/ HTTP/1.1\r\nAccept: text/html\r\nAccept-Language: en\r\nX-Custom: 1\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.path(), "/notes/");
        assert!(request.accept_encoding().is_empty());
        assert_eq!(request.range(), None);
    }

    #[test]
    fn test_http_1_0_is_accepted() {
        let request = parse("GET /healthz HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(request.version(), HttpVersion::V1_0);
    }

    #[test]
    fn test_body_is_ignored() {
        let request =
            parse("POST /submit HTTP/1.1\r\nContent-Length: 10\r\n\r\nuser-agent: x").unwrap();
        assert_eq!(request.method(), HttpRequestMethod::Post);
        assert_eq!(request.user_agent(), "");
    }

    #[test]
    fn test_unknown_method() {
        let result = parse("BREW /pot HTTP/1.1\r\n\r\n");
        assert_eq!(result.unwrap_err(), Exception::UnSupportedRequestMethod);
    }

    #[test]
    fn test_unsupported_http_version() {
        let result = parse("GET / HTTP/2.0\r\nHost: localhost\r\n\r\n");
        assert_eq!(result.unwrap_err(), Exception::UnsupportedHttpVersion);
    }

    #[test]
    fn test_malformed_request_line() {
        assert_eq!(parse("GET /\r\n\r\n").unwrap_err(), Exception::MalformedRequest);
        assert_eq!(parse("").unwrap_err(), Exception::MalformedRequest);
    }

    #[test]
    fn test_invalid_utf8() {
        let result = Request::try_from(&[0xFF, 0xFE, 0xFD], 0);
        assert_eq!(result.unwrap_err(), Exception::RequestIsNotUtf8);
    }

    #[test]
    fn test_case_insensitive_headers() {
        let request =
            parse("get / HTTP/1.1\r\nuser-agent: Test\r\nACCEPT-ENCODING: gzip\r\n\r\n").unwrap();
        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.user_agent(), "Test");
        assert_eq!(request.accept_encoding(), &[HttpEncoding::Gzip]);
    }

    #[test]
    fn test_accept_encoding_quality_zero_is_refused() {
        let request = parse("GET / HTTP/1.1\r\nAccept-Encoding: br;q=0, gzip;q=0.5\r\n\r\n").unwrap();
        assert_eq!(request.accept_encoding(), &[HttpEncoding::Gzip]);
    }

    #[test]
    fn test_path_with_query_string() {
        let request = parse("GET /search.html?q=generator HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.path(), "/search.html?q=generator");
    }

    #[test]
    fn test_range_forms() {
        let request = parse("GET /a.pdf HTTP/1.1\r\nRange: bytes=0-99\r\n\r\n").unwrap();
        assert_eq!(request.range(), Some(ByteRange::FromTo(0, Some(99))));

        let request = parse("GET /a.pdf HTTP/1.1\r\nRange: bytes=100-\r\n\r\n").unwrap();
        assert_eq!(request.range(), Some(ByteRange::FromTo(100, None)));

        let request = parse("GET /a.pdf HTTP/1.1\r\nRange: bytes=-20\r\n\r\n").unwrap();
        assert_eq!(request.range(), Some(ByteRange::Suffix(20)));

        let request = parse("GET /a.pdf HTTP/1.1\r\nRange: items=1-2\r\n\r\n").unwrap();
        assert_eq!(request.range(), None);
    }

    #[test]
    fn test_range_resolve() {
        assert_eq!(ByteRange::FromTo(0, Some(9)).resolve(100), Some((0, 9)));
        assert_eq!(ByteRange::FromTo(90, None).resolve(100), Some((90, 99)));
        assert_eq!(ByteRange::FromTo(90, Some(500)).resolve(100), Some((90, 99)));
        assert_eq!(ByteRange::FromTo(100, None).resolve(100), None);
        assert_eq!(ByteRange::FromTo(10, Some(5)).resolve(100), None);
        assert_eq!(ByteRange::Suffix(20).resolve(100), Some((80, 99)));
        assert_eq!(ByteRange::Suffix(500).resolve(100), Some((0, 99)));
        assert_eq!(ByteRange::Suffix(0).resolve(100), None);
        assert_eq!(ByteRange::FromTo(0, None).resolve(0), None);
    }

    #[test]
    fn test_conditional_headers() {
        let request = parse(
            "GET / HTTP/1.1\r\nIf-None-Match: W/\"abc\"\r\nIf-Modified-Since: Wed, 21 Oct 2015 07:28:00 GMT\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.if_none_match(), Some("W/\"abc\""));
        assert_eq!(
            request.if_modified_since(),
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
