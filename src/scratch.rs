use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

/// 每个在途任务的暂存目录布局（均由 basename 推导）：
/// `tmp/download/<base>`、`tmp/decompress/<base>`、`tmp/compress/<base>`。
/// 任务只持有已进入且尚未释放阶段的目录；释放发生在下一阶段的收尾块。
#[derive(Debug, Clone)]
pub struct ScratchLayout {
    root: PathBuf,
}

impl ScratchLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        ScratchLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn download_dir(&self, base: &str) -> PathBuf {
        self.root.join("tmp").join("download").join(base)
    }

    pub fn decompress_dir(&self, base: &str) -> PathBuf {
        self.root.join("tmp").join("decompress").join(base)
    }

    pub fn compress_dir(&self, base: &str) -> PathBuf {
        self.root.join("tmp").join("compress").join(base)
    }

    /// 日志目录固定在暂存根下，不可配置。
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn default_db_path(&self) -> PathBuf {
        self.root.join("tasks.db")
    }

    pub fn ensure(dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建暂存目录: {}", dir.display()))
    }

    /// 尽力删除整个目录；目录不存在视为成功。
    pub fn purge(dir: &Path) {
        if dir.exists()
            && let Err(e) = std::fs::remove_dir_all(dir)
        {
            tracing::warn!("[scratch] 清理目录失败 {}: {}", dir.display(), e);
        }
    }

    /// 统计目录下产物的数量与总字节数（压缩阶段日志用）。
    pub fn measure(dir: &Path) -> (u64, u64) {
        let mut files = 0u64;
        let mut bytes = 0u64;
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file()
                && let Ok(meta) = entry.metadata()
            {
                files += 1;
                bytes += meta.len();
            }
        }
        (files, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tmp_dir() -> PathBuf {
        let mut base = std::env::temp_dir();
        let uniq = format!(
            "arl_scratch_test_{}_{}",
            std::process::id(),
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        );
        base.push(uniq);
        std::fs::create_dir(&base).expect("create tmp dir");
        base
    }

    #[test]
    fn layout_paths_derive_from_base() {
        let layout = ScratchLayout::new("/scratch");
        assert_eq!(layout.download_dir("foo"), PathBuf::from("/scratch/tmp/download/foo"));
        assert_eq!(layout.decompress_dir("foo"), PathBuf::from("/scratch/tmp/decompress/foo"));
        assert_eq!(layout.compress_dir("foo"), PathBuf::from("/scratch/tmp/compress/foo"));
    }

    #[test]
    fn purge_missing_dir_is_noop() {
        let dir = make_tmp_dir();
        let missing = dir.join("nope");
        ScratchLayout::purge(&missing);
        assert!(!missing.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn measure_counts_files_and_bytes() {
        let dir = make_tmp_dir();
        std::fs::write(dir.join("a.7z"), b"12345").expect("write a");
        std::fs::create_dir(dir.join("sub")).expect("mkdir");
        std::fs::write(dir.join("sub").join("b.7z"), b"123").expect("write b");
        let (files, bytes) = ScratchLayout::measure(&dir);
        assert_eq!(files, 2);
        assert_eq!(bytes, 8);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
