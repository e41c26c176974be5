// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 站点地图
//!
//! 遍历 HTML 构建目录，生成 sitemaps.org 格式的 `urlset` 文档。
//! `index.html` 折叠为所在目录的 URL，`sitemap_exclude` 中的正则用于
//! 跳过 `_static`、`genindex.html` 之类不应被收录的页面。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use quick_xml::escape::escape;
use regex::Regex;
use walkdir::WalkDir;

use crate::{config::Config, exception::Exception, param::INDEX_FILE};

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// URL 路径段中必须转义的字符
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: DateTime<Utc>,
}

pub struct Sitemap {
    root: PathBuf,
    site_url: String,
    exclude: Vec<Regex>,
}

impl Sitemap {
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        Self::new(config.build_root(), config.site_url(), config.sitemap_exclude())
    }

    pub fn new<P: Into<PathBuf>>(
        root: P,
        site_url: &str,
        exclude: &[String],
    ) -> Result<Self, Exception> {
        let mut compiled = Vec::with_capacity(exclude.len());
        for pattern in exclude {
            match Regex::new(pattern) {
                Ok(re) => compiled.push(re),
                Err(e) => {
                    error!("sitemap_exclude中的正则表达式{}无效: {}", pattern, e);
                    return Err(Exception::InvalidExcludePattern);
                }
            }
        }
        Ok(Self {
            root: root.into(),
            site_url: site_url.trim_end_matches('/').to_string(),
            exclude: compiled,
        })
    }

    /// 收集构建目录下所有应被收录的 HTML 页面，按 URL 排序。
    ///
    /// 与路由一致：跟随符号链接，但解析后越出构建目录的文件不收录。
    pub fn collect(&self) -> Result<Vec<SitemapEntry>, Exception> {
        let canonical_root = self.root.canonicalize().map_err(|e| {
            error!("无法读取目录{}: {}", self.root.display(), e);
            Exception::IoFailed
        })?;
        let mut entries = vec![];
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.loop_ancestor().is_some() => {
                    warn!("站点地图跳过循环链接: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("遍历构建目录失败: {}", e);
                    return Err(Exception::IoFailed);
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "html") {
                continue;
            }
            let rel = match relative_url_path(&self.root, path) {
                Some(r) => r,
                None => continue,
            };
            if self.exclude.iter().any(|re| re.is_match(&rel)) {
                debug!("站点地图跳过{}", rel);
                continue;
            }
            if !stays_inside(path, &canonical_root) {
                debug!("站点地图跳过越出构建目录的链接{}", rel);
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(|_| Exception::IoFailed)?
                .modified()
                .map_err(|_| Exception::IoFailed)?;
            entries.push(SitemapEntry {
                loc: format!("{}/{}", self.site_url, page_url(&rel)),
                lastmod: modified.into(),
            });
        }
        entries.sort_by(|a, b| a.loc.cmp(&b.loc));
        Ok(entries)
    }

    pub fn render(&self) -> Result<String, Exception> {
        Ok(to_xml(&self.collect()?))
    }

    /// 将站点地图写入 `output`，返回收录的页面数。
    pub fn write_to(&self, output: &Path) -> Result<usize, Exception> {
        let entries = self.collect()?;
        fs::write(output, to_xml(&entries)).map_err(|e| {
            error!("无法写入站点地图{}: {}", output.display(), e);
            Exception::IoFailed
        })?;
        info!("站点地图已写入{}，共{}个页面", output.display(), entries.len());
        Ok(entries.len())
    }
}

fn stays_inside(path: &Path, canonical_root: &Path) -> bool {
    path.canonicalize()
        .map(|p| p.starts_with(canonical_root))
        .unwrap_or(false)
}

/// 以 `/` 分隔的相对路径。非 UTF-8 文件名无法出现在 URL 中，返回 `None`。
fn relative_url_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = vec![];
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

fn page_url(rel: &str) -> String {
    let rel = if rel == INDEX_FILE {
        ""
    } else {
        rel.strip_suffix(INDEX_FILE)
            .filter(|dir| dir.ends_with('/'))
            .unwrap_or(rel)
    };
    rel.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn to_xml(entries: &[SitemapEntry]) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!("<urlset xmlns=\"{}\">\n", SITEMAP_NS));
    for entry in entries {
        xml.push_str("  <url>\n");
        xml.push_str(&format!("    <loc>{}</loc>\n", escape(entry.loc.as_str())));
        xml.push_str(&format!(
            "    <lastmod>{}</lastmod>\n",
            entry.lastmod.format("%Y-%m-%d")
        ));
        xml.push_str("  </url>\n");
    }
    xml.push_str("</urlset>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for rel in [
            "index.html",
            "genindex.html",
            "search.html",
            "notes/index.html",
            "notes/python-generator.html",
            "notes/a&b.html",
            "notes/with space.html",
            "_static/ignored.html",
            "_sources/notes/python-generator.rst.txt",
            "objects.inv",
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "x").unwrap();
        }
        dir
    }

    fn default_exclude() -> Vec<String> {
        Config::new().sitemap_exclude().to_vec()
    }

    #[test]
    fn test_page_url() {
        assert_eq!(page_url("index.html"), "");
        assert_eq!(page_url("notes/index.html"), "notes/");
        assert_eq!(page_url("notes/python-basic.html"), "notes/python-basic.html");
        assert_eq!(page_url("notes/with space.html"), "notes/with%20space.html");
        assert_eq!(page_url("myindex.html"), "myindex.html");
    }

    #[test]
    fn test_collect_respects_excludes_and_sorts() {
        let dir = site();
        let sitemap = Sitemap::new(dir.path(), "https://example.org/", &default_exclude()).unwrap();
        let locs: Vec<String> = sitemap.collect().unwrap().into_iter().map(|e| e.loc).collect();
        assert_eq!(
            locs,
            vec![
                "https://example.org/",
                "https://example.org/notes/",
                "https://example.org/notes/a&b.html",
                "https://example.org/notes/python-generator.html",
                "https://example.org/notes/with%20space.html",
            ]
        );
    }

    #[test]
    fn test_render_escapes_xml() {
        let dir = site();
        let sitemap = Sitemap::new(dir.path(), "https://example.org", &default_exclude()).unwrap();
        let xml = sitemap.render().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(SITEMAP_NS));
        assert!(xml.contains("<loc>https://example.org/notes/a&amp;b.html</loc>"));
        assert!(!xml.contains("_static"));
        assert_eq!(xml.matches("<url>").count(), 5);
    }

    #[test]
    fn test_to_xml_lastmod() {
        let entries = vec![SitemapEntry {
            loc: "https://example.org/".to_string(),
            lastmod: Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap(),
        }];
        let xml = to_xml(&entries);
        assert!(xml.contains("<lastmod>2024-03-09</lastmod>"));
    }

    #[test]
    fn test_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let sitemap = Sitemap::new(dir.path(), "https://example.org", &[]).unwrap();
        let xml = sitemap.render().unwrap();
        assert!(xml.contains("<urlset"));
        assert!(!xml.contains("<url>"));
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let sitemap = Sitemap::new(dir.path().join("absent"), "https://example.org", &[]).unwrap();
        assert_eq!(sitemap.collect().unwrap_err(), Exception::IoFailed);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_follow_router_rules() {
        let dir = site();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.html"), "x").unwrap();
        let root = dir.path();
        std::os::unix::fs::symlink(root.join("notes/python-generator.html"), root.join("notes/py-gen.html"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.html"), root.join("leak.html")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("outside")).unwrap();
        // 指向自身祖先的循环链接
        std::os::unix::fs::symlink(root.join("notes"), root.join("notes/loop")).unwrap();

        let sitemap = Sitemap::new(root, "https://example.org", &default_exclude()).unwrap();
        let locs: Vec<String> = sitemap.collect().unwrap().into_iter().map(|e| e.loc).collect();
        assert!(locs.contains(&"https://example.org/notes/py-gen.html".to_string()));
        assert!(!locs.iter().any(|l| l.contains("leak") || l.contains("secret")));
        assert!(!locs.iter().any(|l| l.contains("/loop/")));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = Sitemap::new("site", "https://example.org", &["(".to_string()]);
        assert_eq!(result.err(), Some(Exception::InvalidExcludePattern));
    }

    #[test]
    fn test_write_to() {
        let dir = site();
        let sitemap = Sitemap::new(dir.path(), "https://example.org", &default_exclude()).unwrap();
        let out = dir.path().join("sitemap.xml");
        assert_eq!(sitemap.write_to(&out).unwrap(), 5);
        assert!(fs::read_to_string(out).unwrap().contains("<urlset"));
    }
}
