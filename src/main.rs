// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # sheetserver
//!
//! 速查表文档站的命令行入口：
//! - `build`：调用文档生成器构建 HTML（可选 PDF），并写出站点地图
//! - `serve`：以异步 Web 服务器提供构建结果
//! - `sitemap`：单独生成站点地图
//! - `clean`：删除构建输出

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
};
use sheetserver::{builder::DocBuilder, commands, config::Config};

const LOG_CONFIG: &str = "config/log4rs.yaml";

#[derive(Parser)]
#[command(name = "sheetserver")]
#[command(version, about = "Build and serve the cheatsheet documentation site", long_about = None)]
#[command(after_help = "EXAMPLES:
    sheetserver build               Build HTML and sitemap.xml
    sheetserver build --pdf         Also build the PDF
    sheetserver serve --port 8080   Serve the built site")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "PATH", default_value = "config/sheetserver.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the built site over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen on all interfaces instead of loopback
        #[arg(long)]
        public: bool,
    },
    /// Run the documentation generator
    Build {
        /// Also build the PDF
        #[arg(long)]
        pdf: bool,

        /// Do not write sitemap.xml into the HTML output
        #[arg(long)]
        no_sitemap: bool,
    },
    /// Write sitemap.xml for the current build
    Sitemap {
        /// Output file, defaults to <build_root>/sitemap.xml
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Remove the build output
    Clean,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::from_toml(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("配置文件{}载入失败: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("配置文件已载入");

    let result = match cli.command {
        Command::Serve { port, public } => {
            let mut config = config;
            commands::apply_serve_overrides(&mut config, port, public);
            commands::serve(config)
        }
        Command::Build { pdf, no_sitemap } => {
            let builder = DocBuilder::from_config(&config);
            commands::build(&builder, &config, pdf, !no_sitemap)
        }
        Command::Sitemap { output } => commands::write_sitemap(&config, output).map(|_| ()),
        Command::Clean => DocBuilder::from_config(&config).clean(),
    };

    if let Err(e) = &result {
        error!("{}", e);
    }
    commands::exit_code(&result)
}

/// 优先使用 YAML 配置；文件缺失或无效时退回到控制台输出。
fn init_logging() {
    match log4rs::init_file(LOG_CONFIG, Default::default()) {
        Ok(()) => return,
        Err(e) => eprintln!("无法载入{}（{}），使用控制台日志", LOG_CONFIG, e),
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}",
        )))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("日志系统初始化失败: {}", e);
            }
        }
        Err(e) => eprintln!("日志配置无效: {}", e),
    }
}
