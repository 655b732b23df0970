use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// 探测指定目录所在文件系统的可用空间（字节）。
pub fn probe_free_space(path: &Path) -> Result<u64> {
    fs4::available_space(path)
        .with_context(|| format!("无法探测可用空间: {}", path.display()))
}

/// 将失败任务清单追加写入日志目录（带 UTC 时间戳表头）。
/// 返回写入的文件路径；清单为空时不写。
pub fn write_failures(logs_dir: &Path, failures: &[(String, String)]) -> Option<PathBuf> {
    if failures.is_empty() {
        return None;
    }
    let _ = std::fs::create_dir_all(logs_dir);
    let path = logs_dir.join("failures.log");
    // 追加模式，保留历史运行的清单
    let mut f = std::fs::OpenOptions::new().create(true).append(true).open(&path).ok()?;
    let _ = writeln!(f, "Failed tasks (UTC {}):", Utc::now().format("%Y%m%dT%H%M%SZ"));
    for (base, log) in failures {
        let _ = writeln!(f, "{}: {}", base, log);
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn probe_free_space_on_tmp() {
        let free = probe_free_space(std::env::temp_dir().as_path()).expect("probe");
        assert!(free > 0);
    }

    #[test]
    fn write_failures_appends_with_header() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "arl_util_test_{}_{}",
            std::process::id(),
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        ));
        let failures = vec![("baz".to_string(), "没有正确的密码".to_string())];
        let path = write_failures(&dir, &failures).expect("write");
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains("Failed tasks (UTC "));
        assert!(content.contains("baz: 没有正确的密码"));
        // 空清单不写
        assert!(write_failures(&dir, &[]).is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
