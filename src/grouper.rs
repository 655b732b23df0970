use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::parse::join_remote;

/// 远端列表返回的单个文件记录。
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub size: u64,
}

/// 归并后的归档集：成员路径（有序去重）与总大小。
#[derive(Debug, Clone, Default)]
pub struct GroupedSet {
    pub member_paths: BTreeSet<String>,
    pub total_size: u64,
}

// 压缩家族匹配顺序固定：rar -> 7z -> zip -> sfx，首个命中即停。
static FAMILY_PATTERNS: LazyLock<[(&'static str, Regex); 4]> = LazyLock::new(|| {
    [
        ("rar", Regex::new(r"(?i)^(?P<base>.+?)(?:\.part\d+)?\.rar$").expect("rar pattern")),
        ("7z", Regex::new(r"(?i)^(?P<base>.+?)\.7z(?:\.\d{3})?$").expect("7z pattern")),
        ("zip", Regex::new(r"(?i)^(?P<base>.+?)\.zip(?:\.\d{3})?$").expect("zip pattern")),
        // 仅匹配带分卷标识的自解压包，如 name.part01.exe / name.001.exe
        ("sfx", Regex::new(r"(?i)^(?P<base>.+?)\.(?:part\d+|\d{3})\.exe$").expect("sfx pattern")),
    ]
});

/// 从文件名中提取归档基础名；不属于任何压缩家族时返回 None。
pub fn match_archive_base(name: &str) -> Option<String> {
    for (_, pattern) in FAMILY_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(name) {
            return Some(caps["base"].to_string());
        }
    }
    None
}

/// 将远端文件列表按归档集归并。
///
/// - 文件名必须命中某个压缩家族，否则该记录被静默丢弃。
/// - `depth == 0` 时键为提取出的基础名；`depth > 0` 时键为规范化路径中
///   第 `depth-1` 个目录分量（路径过短时回退为基础名）。
/// - 成员路径统一以 `source_prefix` 前缀、正斜杠存储。
pub fn group_archives(
    records: &[FileRecord],
    source_prefix: &str,
    depth: usize,
) -> Result<BTreeMap<String, GroupedSet>> {
    if records.is_empty() {
        return Err(anyhow::anyhow!("没有可供分类的文件列表"));
    }

    let mut categorized: BTreeMap<String, GroupedSet> = BTreeMap::new();
    for record in records {
        let Some(base) = match_archive_base(&record.name) else {
            continue;
        };
        let full_path = join_remote(source_prefix, &record.path);

        let key = if depth == 0 {
            base
        } else {
            let parts: Vec<&str> = full_path.split('/').filter(|s| !s.is_empty()).collect();
            // depth-1 必须指向目录分量而非末尾文件名，否则回退为基础名
            if depth < parts.len() { parts[depth - 1].to_string() } else { base }
        };

        let entry = categorized.entry(key).or_default();
        entry.member_paths.insert(full_path);
        entry.total_size += record.size;
    }
    Ok(categorized)
}
