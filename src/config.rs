use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    build_root: PathBuf,
    source_dir: PathBuf,
    output_dir: PathBuf,
    generator: String,
    site_url: String,
    port: u16,
    local: bool,
    worker_threads: usize,
    cache_size: usize,
    cache_max_age: u64,
    streaming_threshold: u64,
    chunk_size: usize,
    enable_range_requests: bool,
    read_timeout_secs: u64,
    sitemap_exclude: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            build_root: PathBuf::from("docs/_build/html"),
            source_dir: PathBuf::from("docs"),
            output_dir: PathBuf::from("docs/_build"),
            generator: "sphinx-build".to_string(),
            site_url: "http://localhost:5000".to_string(),
            port: 5000,
            local: true,
            worker_threads: 0,
            cache_size: 5,
            cache_max_age: 3600,
            streaming_threshold: 10485760, // 10MB
            chunk_size: 262144,            // 256KB
            enable_range_requests: true,
            read_timeout_secs: 10,
            sitemap_exclude: vec![
                r"(^|/)_".to_string(),
                r"^genindex\.html$".to_string(),
                r"^search\.html$".to_string(),
                r"^404\.html$".to_string(),
            ],
        }
    }

    /// 从 TOML 文件载入配置。文件不存在时使用默认值，存在但无法解析则报错。
    pub fn from_toml<P: AsRef<Path>>(filename: P) -> Result<Self, Exception> {
        let filename = filename.as_ref();
        let raw = match fs::read_to_string(filename) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("配置文件{}不存在，使用默认配置", filename.display());
                return Ok(Config::new().normalized());
            }
            Err(e) => {
                error!("无法读取配置文件{}: {}", filename.display(), e);
                return Err(Exception::ConfigUnreadable);
            }
        };
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, Exception> {
        match toml::from_str::<Config>(raw) {
            Ok(c) => Ok(c.normalized()),
            Err(e) => {
                error!("无法从配置文件构建配置对象: {}", e);
                Err(Exception::ConfigInvalid)
            }
        }
    }

    fn normalized(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为5。");
            self.cache_size = 5;
        }
        if self.chunk_size == 0 {
            warn!("chunk_size被设置为0，改为默认值262144");
            self.chunk_size = 262144;
        }
        self
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn set_local(&mut self, local: bool) {
        self.local = local;
    }

    pub fn set_build_root<P: Into<PathBuf>>(&mut self, root: P) {
        self.build_root = root.into();
    }

    pub fn set_site_url(&mut self, url: &str) {
        self.site_url = url.to_string();
    }

    pub fn set_streaming_threshold(&mut self, threshold: u64) {
        self.streaming_threshold = threshold;
    }

    pub fn set_enable_range_requests(&mut self, enabled: bool) {
        self.enable_range_requests = enabled;
    }
}

impl Config {
    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn generator(&self) -> &str {
        &self.generator
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn cache_max_age(&self) -> u64 {
        self.cache_max_age
    }

    pub fn streaming_threshold(&self) -> u64 {
        self.streaming_threshold
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn enable_range_requests(&self) -> bool {
        self.enable_range_requests
    }

    pub fn read_timeout_secs(&self) -> u64 {
        self.read_timeout_secs
    }

    pub fn sitemap_exclude(&self) -> &[String] {
        &self.sitemap_exclude
    }
}
