use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;

use super::Counters;
use super::queues::Stage;
use crate::budget::{DiskBudget, ReserveOutcome};
use crate::config::Config;
use crate::error::StageError;
use crate::packer::Packer;
use crate::remote::RemoteFS;
use crate::scratch::ScratchLayout;
use crate::store::{ArchiveSet, Status, Store};

/// 工作线程执行阶段函数所需的全部共享句柄。
/// `next_tx` 是下一阶段队列的入队端；末段（上传）为 None。
pub struct StageCtx {
    pub stage: Stage,
    pub cfg: Arc<Config>,
    pub store: Arc<Store>,
    pub budget: Arc<DiskBudget>,
    pub remote: Arc<dyn RemoteFS>,
    pub packer: Arc<dyn Packer>,
    pub scratch: ScratchLayout,
    pub counters: Arc<Counters>,
    pub next_tx: Option<Sender<ArchiveSet>>,
    pub shutdown: Arc<AtomicBool>,
}

impl Clone for StageCtx {
    fn clone(&self) -> Self {
        StageCtx {
            stage: self.stage,
            cfg: self.cfg.clone(),
            store: self.store.clone(),
            budget: self.budget.clone(),
            remote: self.remote.clone(),
            packer: self.packer.clone(),
            scratch: self.scratch.clone(),
            counters: self.counters.clone(),
            next_tx: self.next_tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// 每阶段的生命周期同构：入口等待（仅下载询问预算闸门）、调用阶段
/// 操作、成功则持久化进度后交接，失败则记录状态并离开流水线；
/// 收尾块清理上一阶段的暂存目录并归还对应份额。
pub fn run_stage(ctx: &StageCtx, worker_id: usize, task: ArchiveSet) {
    tracing::debug!(
        "[pipeline][{}] worker_id={} 接到任务 {}",
        ctx.stage.tag(),
        worker_id,
        task.base_name
    );
    match ctx.stage {
        Stage::Download => run_download(ctx, task),
        Stage::Decompress => run_decompress(ctx, task),
        Stage::Repack => run_repack(ctx, task),
        Stage::Upload => run_upload(ctx, task),
    }
}

/// 从成员远端路径取文件名（剥掉目录与 remote 前缀）。
fn member_file_name(path: &str) -> &str {
    let tail = path.rsplit('/').next().unwrap_or(path);
    tail.rsplit_once(':').map(|(_, rest)| rest).unwrap_or(tail)
}

/// 成功路径：先把进度落库，再交给下一段队列；
/// 交接必须发生在持久化之后。
fn advance(ctx: &StageCtx, task: ArchiveSet) -> Result<(), StageError> {
    let status =
        if ctx.stage == Stage::Upload { Status::Complete } else { Status::Incomplete };
    ctx.store
        .update_progress(&task.base_name, ctx.stage.step(), status, "")
        .map_err(|e| StageError::Unknown(e.to_string()))?;
    match &ctx.next_tx {
        Some(tx) => {
            // 断开只会发生在关停后；此时任务已持久化，丢弃即可
            let _ = tx.send(task);
        }
        None => {
            ctx.counters.add_completed();
            tracing::info!("[pipeline][upload] {} 已完成", task.base_name);
        }
    }
    Ok(())
}

/// 失败路径：记录状态码与失败详情，计入错误聚合，任务离开流水线。
fn record_failure(ctx: &StageCtx, base: &str, err: &StageError) {
    let log = err.to_string();
    tracing::warn!("[pipeline][{}] {} 失败: {}", ctx.stage.tag(), base, log);
    if let Err(e) = ctx.store.update_progress(base, ctx.stage.step(), err.status(), &log) {
        tracing::error!("[pipeline][{}] 记录失败状态时出错: {}", ctx.stage.tag(), e);
    }
    ctx.counters.add_error();
}

/// 下载：在预算闸门处等待，预留整个下游峰值（M_d+M_x+M_c），
/// 再逐个拉取成员分卷。
fn run_download(ctx: &StageCtx, task: ArchiveSet) {
    if ctx.shutdown.load(Ordering::SeqCst) {
        tracing::info!("[pipeline][download] 关停中，跳过 {}", task.base_name);
        return;
    }
    let shares = ctx.cfg.magnification.shares(task.total_size);
    match ctx.budget.reserve(shares.sum()) {
        ReserveOutcome::Granted => {}
        ReserveOutcome::TooLarge => {
            let err = StageError::TooLarge(task.base_name.clone(), task.total_size);
            record_failure(ctx, &task.base_name, &err);
            return;
        }
        ReserveOutcome::Shutdown => {
            // 关停中：任务保持 status=0，留给下一次运行
            tracing::info!("[pipeline][download] 关停中，跳过 {}", task.base_name);
            return;
        }
    }

    let dir = ctx.scratch.download_dir(&task.base_name);
    let result = (|| -> Result<(), StageError> {
        ScratchLayout::ensure(&dir).map_err(|e| StageError::Unknown(e.to_string()))?;
        for member in &task.member_paths {
            let dst = dir.join(member_file_name(member));
            ctx.remote.copy_file(member, &dst.display().to_string())?;
        }
        Ok(())
    })()
    .and_then(|_| advance(ctx, task.clone()));

    if let Err(err) = result {
        ScratchLayout::purge(&dir);
        // 下载没有上一阶段，失败时归还整笔预留
        ctx.budget.release(shares.sum());
        record_failure(ctx, &task.base_name, &err);
    }
}

/// 解压：并行尝试候选密码。输入（下载产物）在本阶段收尾时释放。
fn run_decompress(ctx: &StageCtx, task: ArchiveSet) {
    let shares = ctx.cfg.magnification.shares(task.total_size);
    let src = ctx.scratch.download_dir(&task.base_name);
    let dst = ctx.scratch.decompress_dir(&task.base_name);

    let result = ctx
        .packer
        .decompress(&src, &dst, &ctx.cfg.passwords)
        .and_then(|_| advance(ctx, task.clone()));

    // 收尾：本阶段消费的下载产物与其份额
    ScratchLayout::purge(&src);
    ctx.budget.release(shares.download);

    if let Err(err) = result {
        ScratchLayout::purge(&dst);
        // 不再进入后续阶段，剩余预付份额一并归还
        ctx.budget.release(shares.decompress + shares.compress);
        record_failure(ctx, &task.base_name, &err);
    }
}

/// 重新打包：按配置的压缩率/密码/分卷大小产出新的归档分卷。
fn run_repack(ctx: &StageCtx, task: ArchiveSet) {
    let shares = ctx.cfg.magnification.shares(task.total_size);
    let src = ctx.scratch.decompress_dir(&task.base_name);
    let dst = ctx.scratch.compress_dir(&task.base_name);

    let result = ctx
        .packer
        .compress(
            &src,
            &dst,
            ctx.cfg.repack_password.as_deref(),
            ctx.cfg.level,
            &ctx.cfg.volume,
        )
        .and_then(|_| {
            let (volumes, bytes) = ScratchLayout::measure(&dst);
            tracing::info!(
                "[pipeline][repack] {} 产出 {} 个分卷共 {} 字节",
                task.base_name,
                volumes,
                bytes
            );
            advance(ctx, task.clone())
        });

    ScratchLayout::purge(&src);
    ctx.budget.release(shares.decompress);

    if let Err(err) = result {
        ScratchLayout::purge(&dst);
        ctx.budget.release(shares.compress);
        record_failure(ctx, &task.base_name, &err);
    }
}

/// 上传：把新归档整目录移动到目标远端 <dst>/<base>。
fn run_upload(ctx: &StageCtx, task: ArchiveSet) {
    let shares = ctx.cfg.magnification.shares(task.total_size);
    let src = ctx.scratch.compress_dir(&task.base_name);
    let dst_remote =
        format!("{}/{}", ctx.cfg.dest.trim_end_matches('/'), task.base_name);

    let result = ctx
        .remote
        .move_dir(&src.display().to_string(), &dst_remote)
        .and_then(|_| advance(ctx, task.clone()));

    ScratchLayout::purge(&src);
    ctx.budget.release(shares.compress);

    if let Err(err) = result {
        // 不让失败的上传在目标端留下残卷
        if let Err(purge_err) = ctx.remote.purge(&dst_remote) {
            tracing::debug!("[pipeline][upload] 清理目标端失败: {}", purge_err);
        }
        record_failure(ctx, &task.base_name, &err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_file_name_strips_dirs_and_prefix() {
        assert_eq!(member_file_name("gd:games/sub/a.part1.rar"), "a.part1.rar");
        assert_eq!(member_file_name("gd:a.7z"), "a.7z");
        assert_eq!(member_file_name("/local/b.zip"), "b.zip");
        assert_eq!(member_file_name("c.rar"), "c.rar");
    }
}
