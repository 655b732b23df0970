use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Serialize;

/// 各阶段峰值暂存用量相对归档远端体积的放大系数。
/// 下载预留一次性支付 download+decompress+compress 三段之和，
/// 后续阶段只归还不再新增（准入计算因此保持简单且无死锁）。
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Magnification {
    pub download: f64,
    pub decompress: f64,
    pub compress: f64,
}

impl Default for Magnification {
    fn default() -> Self {
        Magnification { download: 1.0, decompress: 1.1, compress: 1.1 }
    }
}

/// 单个任务按阶段拆分的预留字节份额；下载时整体预留，
/// 各阶段退出时按份额归还，终态任务恰好清零。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageShares {
    pub download: u64,
    pub decompress: u64,
    pub compress: u64,
}

impl Magnification {
    pub fn shares(&self, total_size: u64) -> StageShares {
        StageShares {
            download: (total_size as f64 * self.download) as u64,
            decompress: (total_size as f64 * self.decompress) as u64,
            compress: (total_size as f64 * self.compress) as u64,
        }
    }
}

impl StageShares {
    /// 下载入口一次性预留的总量。
    pub fn sum(&self) -> u64 {
        self.download + self.decompress + self.compress
    }
}

/// 全部运行参数收敛为一个不可变值，构造后传给 Pipeline。
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// 源远端，形如 "gd:games"
    pub source: String,
    /// 目标远端，形如 "od:repacked"
    pub dest: String,
    pub packer_bin: PathBuf,
    pub rclone_bin: PathBuf,
    pub scratch: PathBuf,
    pub db_path: PathBuf,
    /// 解压候选密码（空密码由归档工具兜底追加）
    pub passwords: Vec<String>,
    /// 重新打包密码；None 表示不加密
    pub repack_password: Option<String>,
    /// 压缩率 0-9
    pub level: u8,
    /// 分卷大小，如 "4G"；空串表示不分卷
    pub volume: String,
    pub workers: usize,
    pub download_workers: usize,
    pub heartbeat_secs: u64,
    /// 暂存空间预算（字节），已在构造时完成探测归一
    pub budget_bytes: u64,
    pub depth: usize,
    pub status_addr: Option<String>,
    pub magnification: Magnification,
}

impl Config {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    /// 解析 budget 配置：0 表示探测暂存目录所在文件系统的可用空间，
    /// 非 0 直接采用配置值。
    pub fn resolve_budget(configured: u64, scratch: &Path) -> Result<u64> {
        if configured != 0 {
            return Ok(configured);
        }
        crate::util::probe_free_space(scratch)
    }

    /// 定位外部二进制：带目录分量的路径要求存在，裸名走 PATH 查找。
    pub fn resolve_bin(spec: &Path) -> Result<PathBuf> {
        if spec.components().count() > 1 {
            if spec.exists() {
                return Ok(spec.to_path_buf());
            }
            return Err(anyhow::anyhow!("二进制不存在: {}", spec.display()));
        }
        which::which(spec).with_context(|| format!("PATH 中找不到二进制: {}", spec.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_sum_equals_download_reservation() {
        let m = Magnification::default();
        let shares = m.shares(1000);
        assert_eq!(shares.download, 1000);
        assert_eq!(shares.decompress, 1100);
        assert_eq!(shares.compress, 1100);
        assert_eq!(shares.sum(), 3200);
    }

    #[test]
    fn resolve_budget_prefers_configured_value() {
        let v = Config::resolve_budget(12345, Path::new("/")).expect("resolve");
        assert_eq!(v, 12345);
    }

    #[test]
    fn resolve_budget_zero_probes() {
        let v = Config::resolve_budget(0, std::env::temp_dir().as_path()).expect("probe");
        assert!(v > 0);
    }
}
