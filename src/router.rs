// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由引擎
//!
//! 将请求目标映射到 [`Route`]。
//!
//! ## 路由规则
//! 1. `/sitemap.xml` -> 动态生成的站点地图。
//! 2. `/healthz` -> 存活探针。
//! 3. `/.well-known/acme-challenge/<token>` -> ACME HTTP-01 验证。
//! 4. 其余路径 -> 构建目录下的静态文件；目录映射到其中的 `index.html`，
//!    因此 `/` 即首页。
//!
//! 任何解析结果都不会落在构建目录之外：`..` 段直接视为不存在，符号链接
//! 通过规范化路径后的前缀比较拦截。

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::debug;
use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::{exception::Exception, param::*};

lazy_static! {
    static ref ACME_TOKEN: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Sitemap,
    Health,
    AcmeChallenge(String),
    /// 已规范化、位于构建目录内的文件路径
    Asset(PathBuf),
}

pub fn resolve(target: &str, root: &Path) -> Result<Route, Exception> {
    let raw = target.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
    if !raw.starts_with('/') {
        return Err(Exception::InvalidPath);
    }
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| Exception::InvalidPath)?;
    if decoded.contains('\0') {
        return Err(Exception::InvalidPath);
    }

    if decoded == SITEMAP_PATH {
        return Ok(Route::Sitemap);
    }
    if decoded == HEALTH_PATH {
        return Ok(Route::Health);
    }
    if let Some(token) = decoded.strip_prefix(ACME_PREFIX) {
        return if ACME_TOKEN.is_match(token) {
            Ok(Route::AcmeChallenge(token.to_string()))
        } else {
            Err(Exception::FileNotFound)
        };
    }

    let mut full_path = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(Exception::FileNotFound),
            s if s.contains('\\') => return Err(Exception::FileNotFound),
            s => full_path.push(s),
        }
    }
    if full_path.is_dir() {
        full_path.push(INDEX_FILE);
    }
    debug!("映射物理路径：{}", full_path.display());
    if !full_path.is_file() {
        return Err(Exception::FileNotFound);
    }

    let canonical_root = root.canonicalize().map_err(|_| Exception::FileNotFound)?;
    let canonical = full_path
        .canonicalize()
        .map_err(|_| Exception::FileNotFound)?;
    if !canonical.starts_with(&canonical_root) {
        debug!("路径{}越出构建目录", canonical.display());
        return Err(Exception::FileNotFound);
    }
    Ok(Route::Asset(canonical))
}
