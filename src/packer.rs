use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::unbounded;

use crate::error::StageError;
use crate::grouper::match_archive_base;

/// 归档工具的最小操作面。流水线只依赖该 trait，测试以替身实现。
pub trait Packer: Send + Sync {
    /// 将 `src_dir` 内的分卷解压到 `dst_dir`，逐一尝试候选密码
    /// （空密码总是被追加在末尾）。
    fn decompress(
        &self,
        src_dir: &Path,
        dst_dir: &Path,
        passwords: &[String],
    ) -> Result<(), StageError>;

    /// 将 `src_dir` 压缩为 `dst_dir/<base>.7z`（及分卷兄弟文件）。
    fn compress(
        &self,
        src_dir: &Path,
        dst_dir: &Path,
        password: Option<&str>,
        level: u8,
        volume: &str,
    ) -> Result<(), StageError>;
}

/// 单次解压尝试的结果。
enum Attempt {
    Ok,
    WrongPassword,
    Cancelled,
    Failed(String),
}

/// 调用 7z 官方二进制的实现。
pub struct SevenZip {
    bin: PathBuf,
    /// 压缩/解压线程数，传给 -mmt
    mmt: usize,
}

impl SevenZip {
    pub fn new<P: Into<PathBuf>>(bin: P, mmt: usize) -> Self {
        SevenZip { bin: bin.into(), mmt: mmt.max(1) }
    }

    /// 选择传给 `7z x` 的首个分卷：目录内按名排序后第一个命中
    /// 压缩家族的文件。
    fn first_volume(src_dir: &Path) -> Result<PathBuf, StageError> {
        let mut names: Vec<PathBuf> = std::fs::read_dir(src_dir)
            .map_err(|e| StageError::MissingSource(format!("{}: {}", src_dir.display(), e)))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        names.sort();
        names
            .iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(match_archive_base)
                    .is_some()
            })
            .or_else(|| names.first())
            .cloned()
            .ok_or_else(|| {
                StageError::UnpackFailed(src_dir.display().to_string(), "目录内没有压缩分卷".into())
            })
    }
}

/// 7z 解压参数，抽出便于测试。密码为空时传裸 `-p`。
pub fn decompress_args(volume: &Path, dst_dir: &Path, mmt: usize, password: &str) -> Vec<String> {
    let mut args = vec![
        "x".to_string(),
        volume.display().to_string(),
        format!("-o{}", dst_dir.display()),
        "-aoa".to_string(),
        format!("-mmt={}", mmt),
    ];
    if password.is_empty() {
        args.push("-p".to_string());
    } else {
        args.push(format!("-p{}", password));
    }
    args
}

/// 7z 压缩参数，抽出便于测试。
pub fn compress_args(
    src_dir: &Path,
    dst_location: &Path,
    mmt: usize,
    password: Option<&str>,
    level: u8,
    volume: &str,
) -> Vec<String> {
    let mut args = vec![
        "a".to_string(),
        "-y".to_string(),
        format!("-mx{}", level),
        format!("-mmt={}", mmt),
    ];
    if let Some(pwd) = password
        && !pwd.is_empty()
    {
        args.push(format!("-p{}", pwd));
    }
    if !volume.is_empty() {
        args.push(format!("-v{}", volume));
    }
    args.push(dst_location.display().to_string());
    args.push(src_dir.display().to_string());
    args
}

impl Packer for SevenZip {
    fn decompress(
        &self,
        src_dir: &Path,
        dst_dir: &Path,
        passwords: &[String],
    ) -> Result<(), StageError> {
        if !src_dir.exists() {
            return Err(StageError::MissingSource(src_dir.display().to_string()));
        }
        let volume = Self::first_volume(src_dir)?;
        if let Some(parent) = dst_dir.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StageError::UnpackFailed(src_dir.display().to_string(), e.to_string()))?;
        }

        // 候选密码并行尝试，各自解压进私有的 attempt 目录；
        // 首个成功者胜出，其余子进程尽力终止。空密码兜底。
        let mut candidates: Vec<String> = passwords.to_vec();
        candidates.push(String::new());

        let attempt_dir = |i: usize| -> PathBuf {
            let name = dst_dir.file_name().and_then(|n| n.to_str()).unwrap_or("attempt");
            dst_dir.with_file_name(format!("{}.pw{}", name, i))
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let children: Arc<Mutex<Vec<Option<Child>>>> =
            Arc::new(Mutex::new((0..candidates.len()).map(|_| None).collect()));
        let (result_tx, result_rx) = unbounded::<(usize, Attempt)>();

        let mut handles = Vec::new();
        for (i, pwd) in candidates.iter().enumerate() {
            let bin = self.bin.clone();
            let args = decompress_args(&volume, &attempt_dir(i), self.mmt, pwd);
            let cancelled = cancelled.clone();
            let children = children.clone();
            let tx = result_tx.clone();
            handles.push(std::thread::spawn(move || {
                if cancelled.load(Ordering::SeqCst) {
                    let _ = tx.send((i, Attempt::Cancelled));
                    return;
                }
                tracing::debug!("[packer] 解压尝试 #{}: {:?} {:?}", i, bin, args);
                let mut child = match Command::new(&bin)
                    .args(&args)
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .spawn()
                {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send((i, Attempt::Failed(e.to_string())));
                        return;
                    }
                };
                let mut stderr_pipe = child.stderr.take();
                children.lock().expect("packer 锁被污染")[i] = Some(child);

                // 读 stderr 到 EOF 即等到子进程退出（被杀亦然）
                let mut err_text = String::new();
                if let Some(ref mut pipe) = stderr_pipe {
                    let _ = pipe.read_to_string(&mut err_text);
                }
                let status = {
                    let mut guard = children.lock().expect("packer 锁被污染");
                    let status = guard[i].as_mut().map(|c| c.wait());
                    guard[i] = None;
                    status
                };
                let outcome = match status {
                    Some(Ok(st)) if st.success() => Attempt::Ok,
                    _ if cancelled.load(Ordering::SeqCst) => Attempt::Cancelled,
                    _ if err_text.contains("Wrong password") => Attempt::WrongPassword,
                    Some(Ok(_)) => Attempt::Failed(err_text),
                    Some(Err(e)) => Attempt::Failed(e.to_string()),
                    None => Attempt::Failed("子进程句柄丢失".to_string()),
                };
                let _ = tx.send((i, outcome));
            }));
        }
        drop(result_tx);

        let kill_siblings = |except: usize| {
            cancelled.store(true, Ordering::SeqCst);
            let mut guard = children.lock().expect("packer 锁被污染");
            for (j, slot) in guard.iter_mut().enumerate() {
                if j != except
                    && let Some(child) = slot.as_mut()
                {
                    let _ = child.kill();
                }
            }
        };

        let mut winner: Option<usize> = None;
        let mut hard_failure: Option<String> = None;
        for (i, outcome) in result_rx.iter() {
            match outcome {
                Attempt::Ok => {
                    if winner.is_none() {
                        winner = Some(i);
                        kill_siblings(i);
                    }
                }
                Attempt::Failed(msg) => {
                    if winner.is_none() && hard_failure.is_none() {
                        hard_failure = Some(msg);
                        kill_siblings(usize::MAX);
                    }
                }
                Attempt::WrongPassword => {
                    tracing::debug!("[packer] 尝试 #{} 密码不正确", i);
                }
                Attempt::Cancelled => {}
            }
        }
        for handle in handles {
            let _ = handle.join();
        }

        // 胜者目录就位，落败者的残留一并清掉
        let result = match winner {
            Some(i) => {
                if dst_dir.exists() {
                    let _ = std::fs::remove_dir_all(dst_dir);
                }
                std::fs::rename(attempt_dir(i), dst_dir).map_err(|e| {
                    StageError::UnpackFailed(src_dir.display().to_string(), e.to_string())
                })
            }
            None => match hard_failure {
                Some(msg) => {
                    Err(StageError::UnpackFailed(src_dir.display().to_string(), msg))
                }
                None => Err(StageError::WrongPassword(src_dir.display().to_string())),
            },
        };
        for i in 0..candidates.len() {
            let dir = attempt_dir(i);
            if dir.exists() {
                let _ = std::fs::remove_dir_all(dir);
            }
        }
        result
    }

    fn compress(
        &self,
        src_dir: &Path,
        dst_dir: &Path,
        password: Option<&str>,
        level: u8,
        volume: &str,
    ) -> Result<(), StageError> {
        std::fs::create_dir_all(dst_dir)
            .map_err(|e| StageError::PackFailed(src_dir.display().to_string(), e.to_string()))?;
        let base = src_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("archive");
        let dst_location = dst_dir.join(format!("{}.7z", base));
        let args = compress_args(src_dir, &dst_location, self.mmt, password, level, volume);
        tracing::debug!("[packer] 压缩命令 {:?} {:?}", self.bin, args);
        let output = Command::new(&self.bin)
            .args(&args)
            .output()
            .map_err(|e| StageError::PackFailed(src_dir.display().to_string(), e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(StageError::PackFailed(src_dir.display().to_string(), stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompress_args_with_password() {
        let args =
            decompress_args(Path::new("/t/a.7z"), Path::new("/t/out"), 2, "secret");
        assert_eq!(args[0], "x");
        assert!(args.contains(&"-o/t/out".to_string()));
        assert!(args.contains(&"-aoa".to_string()));
        assert!(args.contains(&"-mmt=2".to_string()));
        assert!(args.contains(&"-psecret".to_string()));
    }

    #[test]
    fn decompress_args_empty_password_is_bare_flag() {
        let args = decompress_args(Path::new("a.7z"), Path::new("out"), 1, "");
        assert!(args.contains(&"-p".to_string()));
        assert!(!args.iter().any(|a| a.len() > 2 && a.starts_with("-p")));
    }

    #[test]
    fn compress_args_full() {
        let args = compress_args(
            Path::new("/t/src"),
            Path::new("/t/out/src.7z"),
            4,
            Some("pwd"),
            9,
            "4G",
        );
        assert_eq!(args[0], "a");
        assert!(args.contains(&"-y".to_string()));
        assert!(args.contains(&"-mx9".to_string()));
        assert!(args.contains(&"-mmt=4".to_string()));
        assert!(args.contains(&"-ppwd".to_string()));
        assert!(args.contains(&"-v4G".to_string()));
        // 输出位置在源路径之前
        let dst_pos = args.iter().position(|a| a == "/t/out/src.7z").unwrap();
        let src_pos = args.iter().position(|a| a == "/t/src").unwrap();
        assert!(dst_pos < src_pos);
    }

    #[test]
    fn compress_args_omit_optional() {
        let args = compress_args(Path::new("s"), Path::new("d.7z"), 1, None, 0, "");
        assert!(args.contains(&"-mx0".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-p")));
        assert!(!args.iter().any(|a| a.starts_with("-v")));
    }

    #[test]
    fn first_volume_prefers_archive_members() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "arl_packer_test_{}_{}",
            std::process::id(),
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        ));
        std::fs::create_dir(&dir).expect("create tmp dir");
        std::fs::write(dir.join("readme.txt"), b"x").expect("write");
        std::fs::write(dir.join("b.part2.rar"), b"x").expect("write");
        std::fs::write(dir.join("b.part1.rar"), b"x").expect("write");
        let volume = SevenZip::first_volume(&dir).expect("volume");
        assert_eq!(volume.file_name().and_then(|n| n.to_str()), Some("b.part1.rar"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
