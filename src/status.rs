use std::io::{BufRead as _, BufReader, Write as _};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::budget::DiskBudget;
use crate::pipeline::Counters;

/// 各阶段在途任务数：下载/解压/压缩/上传。
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActivePerStage {
    pub d: usize,
    pub x: usize,
    pub c: usize,
    pub u: usize,
}

/// 调度器公开状态的只读投影。
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub total_budget: u64,
    pub reserved: u64,
    pub active_per_stage: ActivePerStage,
    pub total_completed: u64,
    pub total_errors: u64,
    pub unfinished_tasks: u64,
    pub total_tasks: u64,
}

/// 快照取数源：预算、计数器与各池在途计数的共享句柄。
#[derive(Clone)]
pub struct SnapshotSource {
    pub budget: Arc<DiskBudget>,
    pub counters: Arc<Counters>,
    pub active: [Arc<AtomicUsize>; 4],
}

impl SnapshotSource {
    pub fn snapshot(&self) -> StatusSnapshot {
        let budget = self.budget.snapshot();
        let (completed, errors, total) = self.counters.totals();
        StatusSnapshot {
            total_budget: budget.total,
            reserved: budget.reserved,
            active_per_stage: ActivePerStage {
                d: self.active[0].load(Ordering::SeqCst),
                x: self.active[1].load(Ordering::SeqCst),
                c: self.active[2].load(Ordering::SeqCst),
                u: self.active[3].load(Ordering::SeqCst),
            },
            total_completed: completed,
            total_errors: errors,
            unfinished_tasks: total.saturating_sub(completed + errors),
            total_tasks: total,
        }
    }
}

/// 启动只读状态端点：`GET /throttling` 返回快照 JSON。
/// 线程随主进程退出一并结束，无写接口。
pub fn spawn_status_server(addr: String, source: SnapshotSource) {
    std::thread::spawn(move || {
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!("[status] 无法监听 {}: {}", addr, e);
                return;
            }
        };
        tracing::info!("[status] 状态端点就绪: http://{}/throttling", addr);
        for stream in listener.incoming() {
            match stream {
                Ok(conn) => {
                    if let Err(e) = handle_request(conn, &source) {
                        tracing::debug!("[status] 请求处理失败: {}", e);
                    }
                }
                Err(e) => tracing::debug!("[status] accept 失败: {}", e),
            }
        }
    });
}

fn handle_request(conn: TcpStream, source: &SnapshotSource) -> std::io::Result<()> {
    let mut reader = BufReader::new(conn);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut conn = reader.into_inner();

    if request_line.starts_with("GET /throttling") {
        let body = serde_json::to_string(&source.snapshot()).unwrap_or_else(|_| "{}".to_string());
        write!(
            conn,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )?;
    } else {
        write!(conn, "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")?;
    }
    conn.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_expected_fields() {
        let source = SnapshotSource {
            budget: Arc::new(DiskBudget::new(1000)),
            counters: Arc::new(Counters::new()),
            active: [
                Arc::new(AtomicUsize::new(1)),
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(2)),
                Arc::new(AtomicUsize::new(0)),
            ],
        };
        source.counters.set_total(5);
        source.counters.add_completed();
        source.counters.add_error();
        let json = serde_json::to_value(source.snapshot()).expect("serialize");
        assert_eq!(json["total_budget"], 1000);
        assert_eq!(json["active_per_stage"]["d"], 1);
        assert_eq!(json["active_per_stage"]["c"], 2);
        assert_eq!(json["total_completed"], 1);
        assert_eq!(json["total_errors"], 1);
        assert_eq!(json["unfinished_tasks"], 3);
        assert_eq!(json["total_tasks"], 5);
    }
}
