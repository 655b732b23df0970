// pipeline module: four-stage backpressured scheduler orchestration
mod pool;
mod queues;
mod runner;

pub use queues::{Stage, StageQueues};
pub use runner::StageCtx;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context as _, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::budget::DiskBudget;
use crate::config::Config;
use crate::grouper::group_archives;
use crate::packer::Packer;
use crate::remote::{ListOptions, RemoteFS};
use crate::scratch::ScratchLayout;
use crate::status::{SnapshotSource, StatusSnapshot, spawn_status_server};
use crate::store::Store;
use crate::util::human_bytes;

use self::pool::WorkerPool;

#[derive(Debug, Default, Clone, Copy)]
struct CounterState {
    total_tasks: u64,
    completed: u64,
    errors: u64,
}

/// 聚合计数：完成数、错误数、任务总数。
/// 独立互斥锁，与预算控制器的锁互不牵连。
pub struct Counters {
    inner: Mutex<CounterState>,
}

impl Counters {
    pub fn new() -> Self {
        Counters { inner: Mutex::new(CounterState::default()) }
    }

    pub fn set_total(&self, total: u64) {
        self.inner.lock().expect("counters 锁被污染").total_tasks = total;
    }

    pub fn add_completed(&self) {
        self.inner.lock().expect("counters 锁被污染").completed += 1;
    }

    pub fn add_error(&self) {
        self.inner.lock().expect("counters 锁被污染").errors += 1;
    }

    /// (completed, errors, total_tasks)
    pub fn totals(&self) -> (u64, u64, u64) {
        let st = self.inner.lock().expect("counters 锁被污染");
        (st.completed, st.errors, st.total_tasks)
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次运行的结果汇总。
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub total_tasks: u64,
    pub completed: u64,
    pub errors: u64,
    pub elapsed_secs: f64,
}

/// 协作式关停句柄：置位后下载准入停止放行，排队任务保持待处理，
/// 在途任务跑完后流水线退出。
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    budget: Arc<DiskBudget>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.budget.shutdown();
    }
}

/// 编排器：入料（列表→归组→入库）、四个工人池、心跳终止判定、
/// 状态快照与关停级联。
pub struct Pipeline {
    cfg: Arc<Config>,
    store: Arc<Store>,
    budget: Arc<DiskBudget>,
    remote: Arc<dyn RemoteFS>,
    packer: Arc<dyn Packer>,
    scratch: ScratchLayout,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    // 下载/解压/压缩/上传各池的在途任务计数
    active: [Arc<AtomicUsize>; 4],
}

impl Pipeline {
    pub fn new(
        cfg: Config,
        store: Store,
        remote: Arc<dyn RemoteFS>,
        packer: Arc<dyn Packer>,
    ) -> Self {
        let budget = Arc::new(DiskBudget::new(cfg.budget_bytes));
        let scratch = ScratchLayout::new(cfg.scratch.clone());
        Pipeline {
            cfg: Arc::new(cfg),
            store: Arc::new(store),
            budget,
            remote,
            packer,
            scratch,
            counters: Arc::new(Counters::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            active: [
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
            ],
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { flag: self.shutdown.clone(), budget: self.budget.clone() }
    }

    fn snapshot_source(&self) -> SnapshotSource {
        SnapshotSource {
            budget: self.budget.clone(),
            counters: self.counters.clone(),
            active: self.active.clone(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot_source().snapshot()
    }

    fn stage_ctx(
        &self,
        stage: Stage,
        next_tx: Option<crossbeam_channel::Sender<crate::store::ArchiveSet>>,
    ) -> StageCtx {
        StageCtx {
            stage,
            cfg: self.cfg.clone(),
            store: self.store.clone(),
            budget: self.budget.clone(),
            remote: self.remote.clone(),
            packer: self.packer.clone(),
            scratch: self.scratch.clone(),
            counters: self.counters.clone(),
            next_tx,
            shutdown: self.shutdown.clone(),
        }
    }

    /// 入料：列出源远端、归组、入库，载回全部待处理任务。
    /// 空列表直接返回零任务（归组器本身对空输入报错）。
    fn intake(&self) -> Result<Vec<crate::store::ArchiveSet>> {
        let records = self
            .remote
            .list(&self.cfg.source, ListOptions::default())
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("列出源远端失败: {}", self.cfg.source))?;
        if records.is_empty() {
            tracing::info!("[pipeline] 源端没有文件，无任务可做");
            return Ok(Vec::new());
        }
        let groups = group_archives(&records, &self.cfg.source, self.cfg.depth)?;
        let inserted = self.store.upsert(&groups)?;
        tracing::info!("[pipeline] 归组 {} 个归档集，新入库 {} 个", groups.len(), inserted);
        let pending = self.store.load_pending()?;
        Ok(pending)
    }

    /// 运行流水线直至所有任务终态（或收到关停信号）。
    pub fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        let pending = self.intake()?;
        let total = pending.len() as u64;
        self.counters.set_total(total);

        if pending.is_empty() {
            return Ok(RunReport {
                total_tasks: 0,
                completed: 0,
                errors: 0,
                elapsed_secs: start.elapsed().as_secs_f64(),
            });
        }
        tracing::info!(
            "[pipeline] 本次运行 {} 个任务，暂存预算 {}",
            total,
            human_bytes(self.cfg.budget_bytes)
        );

        let StageQueues { download, decompress, repack, upload } = StageQueues::new();
        // 监控用的出队端克隆（只看空不消费）
        let watch = [
            download.rx.clone(),
            decompress.rx.clone(),
            repack.rx.clone(),
            upload.rx.clone(),
        ];

        // 各池持有下一段的唯一入队端；编排器只保留下载入队端。
        let download_pool = WorkerPool::spawn(
            Stage::Download,
            self.cfg.download_workers,
            download.rx,
            self.stage_ctx(Stage::Download, Some(decompress.tx)),
            self.active[0].clone(),
        );
        let decompress_pool = WorkerPool::spawn(
            Stage::Decompress,
            self.cfg.workers,
            decompress.rx,
            self.stage_ctx(Stage::Decompress, Some(repack.tx)),
            self.active[1].clone(),
        );
        let repack_pool = WorkerPool::spawn(
            Stage::Repack,
            self.cfg.workers,
            repack.rx,
            self.stage_ctx(Stage::Repack, Some(upload.tx)),
            self.active[2].clone(),
        );
        let upload_pool = WorkerPool::spawn(
            Stage::Upload,
            self.cfg.workers,
            upload.rx,
            self.stage_ctx(Stage::Upload, None),
            self.active[3].clone(),
        );

        let intake_tx = download.tx;
        for task in pending {
            // 入队不阻塞（无界队列）
            let _ = intake_tx.send(task);
        }

        if let Some(addr) = &self.cfg.status_addr {
            spawn_status_server(addr.clone(), self.snapshot_source());
        }

        let (mp, header, total_pb) = init_progress(total);
        // 首次观察到空可能与工人入队下一段交错；连续两次空观察才落闩
        let mut was_idle = false;
        loop {
            std::thread::sleep(self.cfg.heartbeat());
            let (completed, errors, _) = self.counters.totals();
            total_pb.set_position(completed + errors);
            let snap = self.budget.snapshot();
            header.set_message(format!(
                "Worker:{}    预留:{}/{}    完成:{}    失败:{}",
                self.cfg.workers,
                human_bytes(snap.reserved),
                human_bytes(snap.usable),
                completed,
                errors
            ));

            if self.shutdown.load(Ordering::SeqCst) {
                tracing::info!("[pipeline] 收到关停信号，开始排空");
                break;
            }
            let queues_empty = watch.iter().all(|rx| rx.is_empty());
            let none_active = self.active.iter().all(|a| a.load(Ordering::SeqCst) == 0);
            let drained = completed + errors >= total;
            if queues_empty && none_active && drained {
                if was_idle {
                    break;
                }
                was_idle = true;
            } else {
                was_idle = false;
            }
        }

        // 级联关停：唤醒闸门等待者，丢弃下载入队端后各池依序排空
        self.budget.shutdown();
        drop(intake_tx);
        download_pool.join();
        decompress_pool.join();
        repack_pool.join();
        upload_pool.join();

        let _ = mp.clear();
        header.finish_and_clear();
        total_pb.finish_and_clear();

        let (completed, errors, total) = self.counters.totals();
        Ok(RunReport {
            total_tasks: total,
            completed,
            errors,
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }
}

fn init_progress(total: u64) -> (Arc<MultiProgress>, ProgressBar, ProgressBar) {
    let mp = Arc::new(MultiProgress::new());
    let header = mp.add(ProgressBar::new_spinner());
    header.set_style(ProgressStyle::with_template("{msg}").expect("valid header template"));
    let total_pb = mp.add(ProgressBar::new(total));
    total_pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .expect("valid progress template")
        .progress_chars("=> "),
    );
    (mp, header, total_pb)
}
