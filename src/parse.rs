use anyhow::Result;

/// 拆分远端路径：第一个 ':' 之前的部分为 remote 前缀，其余为路径。
/// 纯本地路径没有前缀，返回空前缀并保证路径以 '/' 开头。
pub fn split_remote(input: &str) -> (String, String) {
    match input.split_once(':') {
        Some((prefix, rest)) => (prefix.to_string(), rest.to_string()),
        None => {
            let path = if input.starts_with('/') {
                input.to_string()
            } else {
                format!("/{}", input)
            };
            (String::new(), path)
        }
    }
}

/// 将源前缀与列表返回的相对路径拼接为完整远端路径，反斜杠统一为 '/'。
pub fn join_remote(prefix: &str, rel: &str) -> String {
    let rel = rel.replace('\\', "/");
    if prefix.is_empty() {
        return if rel.starts_with('/') { rel } else { format!("/{}", rel) };
    }
    let base = prefix.trim_end_matches('/');
    format!("{}/{}", base, rel.trim_start_matches('/'))
}

/// 校验远端规格非空，例如 "gd:games" 或本地目录。
pub fn parse_remote_spec(input: &str) -> Result<(String, String)> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("远端规格为空"));
    }
    let (prefix, path) = split_remote(trimmed);
    if prefix.is_empty() && path == "/" {
        return Err(anyhow::anyhow!("远端路径为空: {}", input));
    }
    Ok((prefix, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_with_prefix() {
        let (p, r) = split_remote("gd:games/archive");
        assert_eq!(p, "gd");
        assert_eq!(r, "games/archive");
    }

    #[test]
    fn split_local_adds_slash() {
        let (p, r) = split_remote("tmp/download");
        assert_eq!(p, "");
        assert_eq!(r, "/tmp/download");
    }

    #[test]
    fn join_normalizes_backslash() {
        assert_eq!(join_remote("gd:games", "sub\\a.rar"), "gd:games/sub/a.rar");
        assert_eq!(join_remote("", "sub/a.rar"), "/sub/a.rar");
    }
}
