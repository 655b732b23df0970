use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;

use crate::error::StageError;
use crate::grouper::FileRecord;

/// 列表选项，对应 rclone lsjson 的开关。
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub recurse: bool,
    pub files_only: bool,
    pub no_mime_type: bool,
    pub no_mod_time: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        // 全量递归、仅文件、不取 MIME 与修改时间，列表最快
        ListOptions { recurse: true, files_only: true, no_mime_type: true, no_mod_time: true }
    }
}

/// 远端存储客户端的最小操作面。流水线只依赖该 trait，
/// 测试以本地文件系统实现替身。
pub trait RemoteFS: Send + Sync {
    fn list(&self, remote: &str, opts: ListOptions) -> Result<Vec<FileRecord>, StageError>;
    fn copy_file(&self, src: &str, dst: &str) -> Result<(), StageError>;
    /// 移动整个目录并清理源端空目录。
    fn move_dir(&self, src: &str, dst: &str) -> Result<(), StageError>;
    fn purge(&self, remote: &str) -> Result<(), StageError>;
}

#[derive(Debug, Deserialize)]
struct LsEntry {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Size", default)]
    size: i64,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
}

/// 通过 rclone 子进程实现的远端客户端。
pub struct RcloneRemote {
    bin: PathBuf,
}

impl RcloneRemote {
    pub fn new<P: Into<PathBuf>>(bin: P) -> Self {
        RcloneRemote { bin: bin.into() }
    }

    fn run(&self, op: &str, args: &[String]) -> Result<Vec<u8>, StageError> {
        tracing::debug!("[remote] rclone {} {:?}", op, args);
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .map_err(|e| StageError::RemoteError(op.to_string(), e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(StageError::RemoteError(op.to_string(), stderr));
        }
        Ok(output.stdout)
    }
}

/// rclone 各子命令的参数拼装，抽出便于测试。
pub fn lsjson_args(remote: &str, opts: ListOptions) -> Vec<String> {
    let mut args = vec!["lsjson".to_string(), remote.to_string()];
    if opts.recurse {
        args.push("--recursive".to_string());
    }
    if opts.files_only {
        args.push("--files-only".to_string());
    }
    if opts.no_mime_type {
        args.push("--no-mimetype".to_string());
    }
    if opts.no_mod_time {
        args.push("--no-modtime".to_string());
    }
    args
}

pub fn copyfile_args(src: &str, dst: &str) -> Vec<String> {
    vec!["copyfile".to_string(), src.to_string(), dst.to_string()]
}

pub fn move_args(src: &str, dst: &str) -> Vec<String> {
    vec![
        "move".to_string(),
        src.to_string(),
        dst.to_string(),
        "--delete-empty-src-dirs".to_string(),
    ]
}

pub fn purge_args(remote: &str) -> Vec<String> {
    vec!["purge".to_string(), remote.to_string()]
}

impl RemoteFS for RcloneRemote {
    fn list(&self, remote: &str, opts: ListOptions) -> Result<Vec<FileRecord>, StageError> {
        let stdout = self.run("lsjson", &lsjson_args(remote, opts))?;
        let entries: Vec<LsEntry> = serde_json::from_slice(&stdout)
            .map_err(|e| StageError::RemoteError("lsjson".to_string(), e.to_string()))?;
        let records = entries
            .into_iter()
            .filter(|e| !e.is_dir && e.size >= 0)
            .map(|e| FileRecord { path: e.path, name: e.name, size: e.size as u64 })
            .collect();
        Ok(records)
    }

    fn copy_file(&self, src: &str, dst: &str) -> Result<(), StageError> {
        self.run("copyfile", &copyfile_args(src, dst)).map(|_| ())
    }

    fn move_dir(&self, src: &str, dst: &str) -> Result<(), StageError> {
        self.run("move", &move_args(src, dst)).map(|_| ())
    }

    fn purge(&self, remote: &str) -> Result<(), StageError> {
        self.run("purge", &purge_args(remote)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsjson_args_include_requested_flags() {
        let args = lsjson_args("gd:games", ListOptions::default());
        assert_eq!(args[0], "lsjson");
        assert_eq!(args[1], "gd:games");
        assert!(args.contains(&"--recursive".to_string()));
        assert!(args.contains(&"--files-only".to_string()));
        assert!(args.contains(&"--no-mimetype".to_string()));
        assert!(args.contains(&"--no-modtime".to_string()));
    }

    #[test]
    fn lsjson_args_omit_disabled_flags() {
        let opts = ListOptions { recurse: false, files_only: false, ..Default::default() };
        let args = lsjson_args("gd:", opts);
        assert!(!args.contains(&"--recursive".to_string()));
        assert!(!args.contains(&"--files-only".to_string()));
    }

    #[test]
    fn move_args_delete_empty_src_dirs() {
        let args = move_args("a", "b");
        assert_eq!(args.last().map(String::as_str), Some("--delete-empty-src-dirs"));
    }

    #[test]
    fn ls_entry_parses_rclone_shape() {
        let json = r#"[{"Path":"g/a.part1.rar","Name":"a.part1.rar","Size":42,"IsDir":false},
                       {"Path":"g","Name":"g","Size":-1,"IsDir":true}]"#;
        let entries: Vec<LsEntry> = serde_json::from_str(json).expect("parse");
        assert_eq!(entries.len(), 2);
        assert!(entries[1].is_dir);
        assert_eq!(entries[0].size, 42);
    }
}
