// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 文档构建驱动
//!
//! 调用外部文档生成器（默认 `sphinx-build`）将 `docs/` 渲染为 HTML 或 PDF。
//! 本模块不做任何重试：生成器失败即构建失败，由命令行以非零退出码上报。

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::Command;

use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;

use crate::{config::Config, exception::Exception};

lazy_static! {
    static ref VERSION: Regex = Regex::new(r"(\d+\.\d+(?:\.\d+)?)").unwrap();
}

/// 子进程的退出状态与输出。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` 表示进程被信号终止
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// 运行外部命令的接缝，测试中以 mock 替换。
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// 通过 `std::process::Command` 运行。
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct DocBuilder<R: CommandRunner> {
    runner: R,
    generator: String,
    source_dir: PathBuf,
    output_dir: PathBuf,
}

impl DocBuilder<SystemRunner> {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SystemRunner,
            config.generator(),
            config.source_dir(),
            config.output_dir(),
        )
    }
}

impl<R: CommandRunner> DocBuilder<R> {
    pub fn new<S, O>(runner: R, generator: &str, source_dir: S, output_dir: O) -> Self
    where
        S: Into<PathBuf>,
        O: Into<PathBuf>,
    {
        Self {
            runner,
            generator: generator.to_string(),
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// HTML 输出目录
    pub fn html_dir(&self) -> PathBuf {
        self.output_dir.join("html")
    }

    /// PDF 所在目录
    pub fn pdf_dir(&self) -> PathBuf {
        self.output_dir.join("latex")
    }

    /// 探测生成器是否可用，返回其版本号（若能从输出中识别）。
    pub fn probe(&self) -> Result<Option<String>, Exception> {
        let output = self.invoke(&["--version".to_string()])?;
        let text = format!("{}{}", output.stdout, output.stderr);
        let version = VERSION
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        match &version {
            Some(v) => info!("找到文档生成器{}，版本：{}", self.generator, v),
            None => warn!("无法识别文档生成器{}的版本", self.generator),
        }
        Ok(version)
    }

    pub fn html(&self) -> Result<PathBuf, Exception> {
        let out = self.html_dir();
        info!("开始构建HTML: {} -> {}", self.source_dir.display(), out.display());
        self.invoke(&[
            "-b".to_string(),
            "html".to_string(),
            path_arg(&self.source_dir),
            path_arg(&out),
        ])?;
        info!("HTML构建完成");
        Ok(out)
    }

    pub fn pdf(&self) -> Result<PathBuf, Exception> {
        info!("开始构建PDF: {}", self.source_dir.display());
        self.invoke(&[
            "-M".to_string(),
            "latexpdf".to_string(),
            path_arg(&self.source_dir),
            path_arg(&self.output_dir),
        ])?;
        let out = self.pdf_dir();
        info!("PDF构建完成，输出目录：{}", out.display());
        Ok(out)
    }

    /// 删除整个输出目录。目录本就不存在时视为成功。
    pub fn clean(&self) -> Result<(), Exception> {
        match fs::remove_dir_all(&self.output_dir) {
            Ok(()) => {
                info!("已删除{}", self.output_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{}不存在，无需清理", self.output_dir.display());
                Ok(())
            }
            Err(e) => {
                error!("无法删除{}: {}", self.output_dir.display(), e);
                Err(Exception::IoFailed)
            }
        }
    }

    fn invoke(&self, args: &[String]) -> Result<CommandOutput, Exception> {
        debug!("执行: {} {}", self.generator, args.join(" "));
        let output = match self.runner.run(&self.generator, args) {
            Ok(o) => o,
            Err(e) => {
                error!("无法启动文档生成器{}: {}", self.generator, e);
                return Err(Exception::GeneratorMissing);
            }
        };
        if !output.success() {
            error!(
                "文档生成器{}执行失败（状态{:?}）：{}",
                self.generator,
                output.status,
                output.stderr.trim()
            );
            return Err(Exception::GeneratorFailed(output.status));
        }
        for line in output.stderr.lines().filter(|l| l.contains("WARNING")) {
            warn!("{}", line);
        }
        Ok(output)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
