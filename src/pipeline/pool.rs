use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use super::queues::Stage;
use super::runner::{StageCtx, run_stage};
use crate::store::ArchiveSet;

/// 一个阶段的固定规模工人组。每个工人循环取队列、执行阶段函数，
/// 任务出错不会终止工人；队列断开后工人退出（级联关停的一环）。
/// 在途计数由编排器持有的共享原子量承载。
pub struct WorkerPool {
    stage: Stage,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// 启动 `workers` 个工人。`ctx` 携带下一阶段的唯一入队端：
    /// 分发克隆后原值随本函数落栈，最后一个工人退出即断开下游队列。
    pub fn spawn(
        stage: Stage,
        workers: usize,
        rx: Receiver<ArchiveSet>,
        ctx: StageCtx,
        active: Arc<AtomicUsize>,
    ) -> Self {
        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let ctx = ctx.clone();
            let active = active.clone();
            handles.push(std::thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    active.fetch_add(1, Ordering::SeqCst);
                    run_stage(&ctx, worker_id, task);
                    active.fetch_sub(1, Ordering::SeqCst);
                }
                tracing::debug!("[pipeline][{}] worker_id={} 退出", stage.tag(), worker_id);
            }));
        }
        WorkerPool { stage, handles }
    }

    /// 排空并关闭：等待全部工人退出。
    pub fn join(self) {
        let tag = self.stage.tag();
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("[pipeline][{}] 工人线程异常退出", tag);
            }
        }
    }
}
