use std::sync::{Condvar, Mutex};

use serde::Serialize;

/// `reserve` 的受理结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// 预留已提交
    Granted,
    /// 单笔请求超过安全上限，未提交
    TooLarge,
    /// 正在关停，闸门不再放行
    Shutdown,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BudgetSnapshot {
    pub total: u64,
    pub reserved: u64,
    pub usable: u64,
}

struct State {
    reserved: u64,
    gate_closed: bool,
    shutdown: bool,
}

/// 暂存盘准入控制器。
///
/// 单把互斥锁守护预留计数与闸门状态，Reserve/Release 全序执行。
/// 闸门是电平触发：关闭时新的 `reserve` 调用阻塞；`release` 使预留量
/// 降回安全线以下时重新打开并唤醒等待者。仅下载阶段在入口处询问闸门，
/// 后续阶段消耗的空间已由下载的预留一次性支付，只在退出时归还。
pub struct DiskBudget {
    total: u64,
    usable: u64,
    state: Mutex<State>,
    cond: Condvar,
}

/// 安全系数：实际可受理的预留上限为总预算的 90%。
const SAFETY_FRACTION: f64 = 0.9;

impl DiskBudget {
    pub fn new(total: u64) -> Self {
        let usable = (total as f64 * SAFETY_FRACTION) as u64;
        DiskBudget {
            total,
            usable,
            state: Mutex::new(State { reserved: 0, gate_closed: false, shutdown: false }),
            cond: Condvar::new(),
        }
    }

    /// 申请 `bytes` 字节的预留。
    ///
    /// 单笔超过安全上限立即返回 `TooLarge` 且不改动计数；闸门关闭时
    /// 阻塞等待。获准的调用即使把累计预留推过安全线也会提交成功，
    /// 随后闸门关闭，后来者在 `release` 放量之前一直等待。
    pub fn reserve(&self, bytes: u64) -> ReserveOutcome {
        if bytes > self.usable {
            return ReserveOutcome::TooLarge;
        }
        let mut st = self.state.lock().expect("budget 锁被污染");
        while st.gate_closed && !st.shutdown {
            st = self.cond.wait(st).expect("budget 锁被污染");
        }
        if st.shutdown {
            return ReserveOutcome::Shutdown;
        }
        st.reserved += bytes;
        if st.reserved >= self.usable {
            st.gate_closed = true;
        }
        ReserveOutcome::Granted
    }

    /// 归还 `bytes` 字节；预留量降回安全线以下时重开闸门。
    pub fn release(&self, bytes: u64) {
        let mut st = self.state.lock().expect("budget 锁被污染");
        st.reserved = st.reserved.saturating_sub(bytes);
        if st.gate_closed && !st.shutdown && st.reserved < self.usable {
            st.gate_closed = false;
            self.cond.notify_all();
        }
    }

    /// 关停：闸门永久关闭，唤醒全部等待者让其观察到关停。
    pub fn shutdown(&self) {
        let mut st = self.state.lock().expect("budget 锁被污染");
        st.shutdown = true;
        self.cond.notify_all();
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let st = self.state.lock().expect("budget 锁被污染");
        BudgetSnapshot { total: self.total, reserved: st.reserved, usable: self.usable }
    }

    pub fn usable(&self) -> u64 {
        self.usable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_does_not_mutate() {
        let budget = DiskBudget::new(1000);
        assert_eq!(budget.usable(), 900);
        assert_eq!(budget.reserve(901), ReserveOutcome::TooLarge);
        assert_eq!(budget.snapshot().reserved, 0);
    }

    #[test]
    fn boundary_request_commits_and_closes_gate() {
        let budget = DiskBudget::new(1000);
        assert_eq!(budget.reserve(900), ReserveOutcome::Granted);
        let snap = budget.snapshot();
        assert_eq!(snap.reserved, 900);
        // 闸门已关闭：释放后重新放行
        budget.release(900);
        assert_eq!(budget.reserve(100), ReserveOutcome::Granted);
    }

    #[test]
    fn release_is_saturating() {
        let budget = DiskBudget::new(1000);
        budget.reserve(100);
        budget.release(500);
        assert_eq!(budget.snapshot().reserved, 0);
    }

    #[test]
    fn shutdown_rejects_new_reservations() {
        let budget = DiskBudget::new(1000);
        budget.shutdown();
        assert_eq!(budget.reserve(10), ReserveOutcome::Shutdown);
    }
}
