use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use owo_colors::OwoColorize;

use crate::cli::RunArgs;
use crate::config::{Config, Magnification};
use crate::packer::SevenZip;
use crate::parse::parse_remote_spec;
use crate::pipeline::Pipeline;
use crate::remote::RcloneRemote;
use crate::scratch::ScratchLayout;
use crate::store::Store;
use crate::util::human_bytes;

/// 由 CLI 参数收敛出不可变配置：校验远端规格、定位二进制、
/// 建立暂存目录并归一预算。
pub fn build_config(args: &RunArgs) -> Result<Config> {
    parse_remote_spec(&args.source)?;
    parse_remote_spec(&args.dest)?;
    let packer_bin = Config::resolve_bin(&args.packer_bin)?;
    let rclone_bin = Config::resolve_bin(&args.rclone_bin)?;

    std::fs::create_dir_all(&args.scratch)
        .with_context(|| format!("无法创建暂存目录: {}", args.scratch.display()))?;
    let budget_bytes = Config::resolve_budget(args.budget, &args.scratch)?;
    let layout = ScratchLayout::new(args.scratch.clone());
    let db_path = args.db.clone().unwrap_or_else(|| layout.default_db_path());

    Ok(Config {
        source: args.source.clone(),
        dest: args.dest.clone(),
        packer_bin,
        rclone_bin,
        scratch: args.scratch.clone(),
        db_path,
        passwords: args.passwords.clone(),
        repack_password: args.repack_password.clone(),
        level: args.level.min(9),
        volume: args.volume.clone(),
        workers: args.workers.max(1),
        download_workers: args.download_workers.unwrap_or(args.workers).max(1),
        heartbeat_secs: args.heartbeat,
        budget_bytes,
        depth: args.depth,
        status_addr: args.status_addr.clone(),
        magnification: Magnification::default(),
    })
}

pub fn handle_run(config: Config) -> Result<()> {
    let db_path = config.db_path.clone();
    let logs_dir = ScratchLayout::new(config.scratch.clone()).logs_dir();
    let store = Store::open(&db_path)?;
    let remote = Arc::new(RcloneRemote::new(config.rclone_bin.clone()));
    let packer = Arc::new(SevenZip::new(config.packer_bin.clone(), 1));

    let pipeline = Pipeline::new(config, store, remote, packer);
    let report = pipeline.run()?;

    // 所有任务到达终态即为成功退出；失败任务留待 ls/reset 处置
    if report.total_tasks == 0 {
        println!("{}", "源端没有待处理的归档任务".yellow());
        return Ok(());
    }
    println!(
        "任务 {} 个: {} 完成, {} 失败, 耗时 {:.1} 秒",
        report.total_tasks,
        report.completed.to_string().green(),
        report.errors.to_string().red(),
        report.elapsed_secs
    );
    if report.errors > 0 {
        let store = Store::open(&db_path)?;
        let failures: Vec<(String, String)> = store
            .load_all()?
            .into_iter()
            .filter(|s| s.status.as_i64() >= 2)
            .map(|s| (s.base_name, s.last_log))
            .collect();
        if let Some(path) = crate::util::write_failures(&logs_dir, &failures) {
            println!("失败清单已写入: {}", path.display());
        }
        println!("失败详情见 `arl ls`，可用 `arl reset --failed` 重试");
    }
    Ok(())
}

pub fn handle_ls(db: &Path) -> Result<()> {
    let store = Store::open(db)?;
    let sets = store.load_all()?;
    if sets.is_empty() {
        println!("任务注册表为空");
        return Ok(());
    }
    let title = vec![
        "Basename".cell().bold(true),
        "Size".cell().bold(true),
        "Step".cell().bold(true),
        "Status".cell().bold(true),
        "Log".cell().bold(true),
    ];
    let mut table: Vec<Vec<CellStruct>> = Vec::new();
    for set in &sets {
        table.push(vec![
            set.base_name.as_str().cell(),
            human_bytes(set.total_size).cell().justify(Justify::Right),
            set.step.as_i64().cell().justify(Justify::Right),
            set.status.label().cell(),
            set.last_log.as_str().cell(),
        ]);
    }
    print_stdout(table.table().title(title)).with_context(|| "无法渲染任务表格")?;
    Ok(())
}

pub fn handle_reset(db: &Path, base: Option<String>, failed: bool) -> Result<()> {
    let store = Store::open(db)?;
    match (base, failed) {
        (Some(base), _) => {
            if store.reset(&base)? {
                println!("已重置任务: {}", base);
            } else {
                println!("{}", format!("任务不存在: {}", base).red());
            }
        }
        (None, true) => {
            let count = store.reset_failed()?;
            println!("已重置 {} 个失败任务", count);
        }
        (None, false) => {
            return Err(anyhow::anyhow!("请指定要重置的任务 basename 或 --failed"));
        }
    }
    Ok(())
}
