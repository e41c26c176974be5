// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器处理请求以及驱动文档构建时可能出现的全部异常。
//!
//! ## 设计意图
//! - **请求侧**：每个变体都对应一个 HTTP 状态码，见 [`Exception::status_code`]。
//! - **命令行侧**：任何变体都会让进程以非零退出码结束。

use std::fmt;

/// 处理请求或构建文档过程中发生的异常类型。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    /// 请求头无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行缺失或字段不足。
    MalformedRequest,
    /// 请求头超过了读取缓冲区的上限。
    RequestTooLarge,
    /// 无法识别的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 仅支持 HTTP/1.0 与 HTTP/1.1。
    UnsupportedHttpVersion,
    /// 构建目录下找不到对应资源。对应 `404 Not Found`。
    FileNotFound,
    /// 请求路径无法解码为合法路径。对应 `400 Bad Request`。
    InvalidPath,
    /// 配置文件存在但无法读取。
    ConfigUnreadable,
    /// 配置文件不是合法的 [`crate::config::Config`] TOML。
    ConfigInvalid,
    /// `sitemap_exclude` 中存在非法的正则表达式。
    InvalidExcludePattern,
    /// 无法启动文档生成器（通常是 `sphinx-build` 不在 PATH 中）。
    GeneratorMissing,
    /// 文档生成器以非零状态退出。`None` 表示被信号终止。
    GeneratorFailed(Option<i32>),
    /// 文件系统操作失败。
    IoFailed,
    /// 无法绑定监听端口。
    BindFailed,
}

use Exception::*;

impl Exception {
    /// 请求因该异常失败时服务器返回的状态码。
    pub fn status_code(&self) -> u16 {
        match self {
            RequestIsNotUtf8 | MalformedRequest | RequestTooLarge | UnSupportedRequestMethod
            | InvalidPath => 400,
            UnsupportedHttpVersion => 505,
            FileNotFound => 404,
            _ => 500,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request line"),
            RequestTooLarge => write!(f, "Request head too large"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            FileNotFound => write!(f, "File not found (404)"),
            InvalidPath => write!(f, "Invalid path (400)"),
            ConfigUnreadable => write!(f, "Config file can't be read"),
            ConfigInvalid => write!(f, "Config file is not valid"),
            InvalidExcludePattern => write!(f, "Invalid sitemap exclude pattern"),
            GeneratorMissing => write!(f, "Couldn't invoke the documentation generator"),
            GeneratorFailed(Some(code)) => {
                write!(f, "Documentation generator exited with status {}", code)
            }
            GeneratorFailed(None) => write!(f, "Documentation generator was killed by a signal"),
            IoFailed => write!(f, "Filesystem operation failed"),
            BindFailed => write!(f, "Couldn't bind the listening socket"),
        }
    }
}
