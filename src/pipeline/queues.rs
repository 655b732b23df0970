use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::store::{ArchiveSet, Step};

/// 流水线的四个阶段；任务严格按此顺序逐段推进，不得跳级。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Decompress,
    Repack,
    Upload,
}

impl Stage {
    /// 该阶段成功（或失败）时记入注册表的步数。
    pub fn step(self) -> Step {
        match self {
            Stage::Download => Step::Downloaded,
            Stage::Decompress => Step::Decompressed,
            Stage::Repack => Step::Repacked,
            Stage::Upload => Step::Uploaded,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Decompress => "decompress",
            Stage::Repack => "repack",
            Stage::Upload => "upload",
        }
    }
}

/// 一条阶段间交接队列：无界 FIFO，入队不阻塞，出队阻塞到
/// 有任务或通道断开。任务按值传递，阶段之间不共享可变状态。
pub struct Queue {
    pub tx: Sender<ArchiveSet>,
    pub rx: Receiver<ArchiveSet>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = unbounded::<ArchiveSet>();
        Queue { tx, rx }
    }
}

/// 四条交接队列。发送端所有权经过编排形成级联关停：
/// 编排器持有唯一的下载入队端，阶段 k 的工人持有阶段 k+1 的
/// 唯一入队端；丢弃下载入队端后各池按阶段顺序排空退出。
pub struct StageQueues {
    pub download: Queue,
    pub decompress: Queue,
    pub repack: Queue,
    pub upload: Queue,
}

impl StageQueues {
    pub fn new() -> Self {
        StageQueues {
            download: Queue::new(),
            decompress: Queue::new(),
            repack: Queue::new(),
            upload: Queue::new(),
        }
    }
}

impl Default for StageQueues {
    fn default() -> Self {
        Self::new()
    }
}
