use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use tracing_appender::non_blocking;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use arcrelay::scratch::ScratchLayout;
use arcrelay::{cli, commands};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::Run(args) => {
            let config = commands::build_config(&args)?;
            // 日志固定写入 <scratch>/logs，控制台输出不受影响
            init_tracing(&ScratchLayout::new(config.scratch.clone()), &args.log_level);
            commands::handle_run(config)
        }
        cli::Commands::List { db } => commands::handle_ls(&db),
        cli::Commands::Reset { db, base, failed } => commands::handle_reset(&db, base, failed),
    }
}

fn init_tracing(layout: &ScratchLayout, level: &str) {
    let logs_dir = layout.logs_dir();
    let _ = std::fs::create_dir_all(&logs_dir);
    let log_path = logs_dir.join("arcrelay.log");

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let (non_blocking_writer, guard) = non_blocking(file);
            // 泄漏 guard 保持后台写线程存活到进程结束，否则日志会丢
            let _ = Box::leak(Box::new(guard));
            let file_layer = fmt::layer()
                .with_writer(non_blocking_writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new(level));
            tracing_subscriber::registry().with(file_layer).init();
        }
        Err(e) => {
            // 打不开日志文件时静默降级，仅提示一次
            eprintln!("warning: could not open debug log at {}: {}", log_path.display(), e);
        }
    }
}
