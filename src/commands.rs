// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 子命令实现
//!
//! 二进制入口只负责解析参数、初始化日志，具体工作都在这里完成。
//! 每个子命令返回 `Result<(), Exception>`，由 [`exit_status`] 映射为进程退出码。

use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info, warn};
use tokio::runtime::Builder;

use crate::{
    builder::{CommandRunner, DocBuilder},
    config::Config,
    exception::Exception,
    server::{shutdown_signal, Server},
    sitemap::Sitemap,
};

/// 成功为0，任何异常都为1。
pub fn exit_status(result: &Result<(), Exception>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

pub fn exit_code(result: &Result<(), Exception>) -> ExitCode {
    ExitCode::from(exit_status(result))
}

/// 命令行参数覆盖配置文件中的值。
pub fn apply_serve_overrides(config: &mut Config, port: Option<u16>, public: bool) {
    if let Some(port) = port {
        config.set_port(port);
    }
    if public {
        config.set_local(false);
    }
}

/// 创建多线程运行时并运行服务器，直到收到停机信号。
pub fn serve(config: Config) -> Result<(), Exception> {
    info!("build root: {}", config.build_root().display());
    let runtime = Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
        .map_err(|e| {
            error!("无法创建Tokio运行时: {}", e);
            Exception::IoFailed
        })?;

    runtime.block_on(async {
        let server = Server::bind(config).await?;
        server.run_until(shutdown_signal()).await;
        Ok::<(), Exception>(())
    })
}

/// 探测生成器、构建 HTML（可选 PDF），最后在 HTML 输出目录写入站点地图。
pub fn build<R: CommandRunner>(
    builder: &DocBuilder<R>,
    config: &Config,
    pdf: bool,
    sitemap: bool,
) -> Result<(), Exception> {
    builder.probe()?;
    let html_dir = builder.html()?;
    if pdf {
        builder.pdf()?;
    }
    if sitemap {
        let map = Sitemap::new(&html_dir, config.site_url(), config.sitemap_exclude())?;
        map.write_to(&html_dir.join("sitemap.xml"))?;
    } else {
        warn!("已跳过站点地图生成");
    }
    Ok(())
}

/// 写出站点地图，`output` 缺省为 `<build_root>/sitemap.xml`。返回实际写入的路径。
pub fn write_sitemap(config: &Config, output: Option<PathBuf>) -> Result<PathBuf, Exception> {
    let output = output.unwrap_or_else(|| config.build_root().join("sitemap.xml"));
    Sitemap::from_config(config)?.write_to(&output)?;
    Ok(output)
}
