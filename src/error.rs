use crate::store::Status;

/// Typed failures produced by the four pipeline stages. Each kind maps to a
/// terminal status code persisted in the task registry.
#[derive(Debug, Clone)]
pub enum StageError {
    /// 候选密码全部失败（解压阶段）
    WrongPassword(String),
    /// 解压源目录不存在
    MissingSource(String),
    /// 解压过程报错，保留压缩包与原始错误输出
    UnpackFailed(String, String),
    /// 压缩过程报错
    PackFailed(String, String),
    /// 远端客户端报错（下载/上传）
    RemoteError(String, String),
    /// 单个归档超过可用暂存空间，无法受理
    TooLarge(String, u64),
    /// 其余未分类错误
    Unknown(String),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use StageError::*;
        match self {
            WrongPassword(base) => write!(f, "{} 没有正确的密码", base),
            MissingSource(path) => write!(f, "源文件夹不存在: {}", path),
            UnpackFailed(src, msg) => write!(f, "{} 解压过程中发生错误: {}", src, msg),
            PackFailed(src, msg) => write!(f, "{} 压缩过程中发生错误: {}", src, msg),
            RemoteError(op, msg) => write!(f, "远端操作失败: {} — {}", op, msg),
            TooLarge(base, bytes) => {
                write!(f, "{} 体积过大（{} 字节），超过暂存空间上限", base, bytes)
            }
            Unknown(msg) => write!(f, "未知错误: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

impl StageError {
    /// Terminal status recorded in the registry for this failure kind.
    pub fn status(&self) -> Status {
        use StageError::*;
        match self {
            WrongPassword(_) => Status::BadPassword,
            MissingSource(_) | UnpackFailed(_, _) | PackFailed(_, _) | RemoteError(_, _)
            | TooLarge(_, _) => Status::KnownError,
            Unknown(_) => Status::UnknownError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(StageError::WrongPassword("a".into()).status(), Status::BadPassword);
        assert_eq!(StageError::MissingSource("p".into()).status(), Status::KnownError);
        assert_eq!(
            StageError::RemoteError("copyfile".into(), "io".into()).status(),
            Status::KnownError
        );
        assert_eq!(StageError::TooLarge("a".into(), 1).status(), Status::KnownError);
        assert_eq!(StageError::Unknown("x".into()).status(), Status::UnknownError);
    }
}
