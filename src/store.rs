use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, params};

use crate::grouper::GroupedSet;

/// 任务所处的流水线阶段，仅允许单调递增。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Pending = 0,
    Downloaded = 1,
    Decompressed = 2,
    Repacked = 3,
    Uploaded = 4,
}

impl Step {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Step::Downloaded,
            2 => Step::Decompressed,
            3 => Step::Repacked,
            4 => Step::Uploaded,
            _ => Step::Pending,
        }
    }
}

/// 任务终态；0 表示仍在流水线内。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Incomplete = 0,
    Complete = 1,
    BadPassword = 2,
    KnownError = 3,
    UnknownError = 4,
}

impl Status {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Status::Complete,
            2 => Status::BadPassword,
            3 => Status::KnownError,
            4 => Status::UnknownError,
            _ => Status::Incomplete,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Incomplete => "未完成",
            Status::Complete => "已完成",
            Status::BadPassword => "密码错误",
            Status::KnownError => "已知错误",
            Status::UnknownError => "未知错误",
        }
    }
}

/// 一个逻辑归档集（可能跨多个分卷文件），流水线的工作单元。
#[derive(Debug, Clone)]
pub struct ArchiveSet {
    pub base_name: String,
    pub member_paths: Vec<String>,
    pub total_size: u64,
    pub step: Step,
    pub status: Status,
    pub last_log: String,
}

/// 任务注册表：basename -> 归档集，SQLite 持久化。
/// 写入方通过内部互斥串行化，可被任意工作线程并发调用。
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| "无法打开任务数据库")?;
        Self::init_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// 内存数据库，测试用。
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().with_context(|| "无法打开内存数据库")?;
        Self::init_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS base_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                basename TEXT UNIQUE NOT NULL,
                total_size INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                step INTEGER NOT NULL DEFAULT 0,
                log TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS paths (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                base_file_id INTEGER NOT NULL REFERENCES base_files(id),
                path TEXT NOT NULL,
                UNIQUE(base_file_id, path)
            );",
        )
        .with_context(|| "初始化任务表失败")
    }

    /// 插入新的归档集；已存在的行保持不变（绝不回退进度）。
    /// 返回本批次新插入的任务数。
    pub fn upsert(&self, groups: &BTreeMap<String, GroupedSet>) -> Result<usize> {
        let mut conn = self.conn.lock().expect("store 锁被污染");
        let tx = conn.transaction().with_context(|| "开启事务失败")?;
        let mut inserted = 0usize;
        {
            let mut insert_base = tx
                .prepare("INSERT OR IGNORE INTO base_files (basename, total_size) VALUES (?1, ?2)")
                .with_context(|| "准备插入语句失败")?;
            let mut select_id = tx
                .prepare("SELECT id FROM base_files WHERE basename = ?1")
                .with_context(|| "准备查询语句失败")?;
            let mut insert_path = tx
                .prepare("INSERT OR IGNORE INTO paths (base_file_id, path) VALUES (?1, ?2)")
                .with_context(|| "准备路径插入语句失败")?;

            for (base, set) in groups {
                let changed = insert_base
                    .execute(params![base, set.total_size as i64])
                    .with_context(|| format!("插入任务失败: {}", base))?;
                inserted += changed;
                // upsert 之后必须能解析出行 id，解析失败属程序错误，中止整批
                let id: i64 = select_id
                    .query_row(params![base], |row| row.get(0))
                    .with_context(|| format!("无法解析任务行 id: {}", base))?;
                for path in &set.member_paths {
                    insert_path
                        .execute(params![id, path])
                        .with_context(|| format!("插入成员路径失败: {}", path))?;
                }
            }
        }
        tx.commit().with_context(|| "提交事务失败")?;
        Ok(inserted)
    }

    /// 原子覆写任务的进度三元组。step 在 SQL 内取 MAX 钳制，
    /// 重跑早期阶段不会回退已持久化的步数。
    pub fn update_progress(&self, base: &str, step: Step, status: Status, log: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store 锁被污染");
        let changed = conn
            .execute(
                "UPDATE base_files SET step = MAX(step, ?2), status = ?3, log = ?4
                 WHERE basename = ?1",
                params![base, step.as_i64(), status.as_i64(), log],
            )
            .with_context(|| format!("更新任务进度失败: {}", base))?;
        if changed == 0 {
            return Err(anyhow::anyhow!("任务不存在: {}", base));
        }
        Ok(())
    }

    /// 载入全部 status=0 的任务（连同成员路径与总大小）。
    pub fn load_pending(&self) -> Result<Vec<ArchiveSet>> {
        self.load_where("WHERE b.status = 0")
    }

    pub fn load_all(&self) -> Result<Vec<ArchiveSet>> {
        self.load_where("")
    }

    fn load_where(&self, clause: &str) -> Result<Vec<ArchiveSet>> {
        let conn = self.conn.lock().expect("store 锁被污染");
        let sql = format!(
            "SELECT b.basename, b.total_size, b.status, b.step, b.log, p.path
             FROM base_files b JOIN paths p ON p.base_file_id = b.id
             {} ORDER BY b.basename, p.path",
            clause
        );
        let mut stmt = conn.prepare(&sql).with_context(|| "准备任务查询失败")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .with_context(|| "查询任务失败")?;

        let mut sets: Vec<ArchiveSet> = Vec::new();
        for row in rows {
            let (base, total_size, status, step, log, path) =
                row.with_context(|| "读取任务行失败")?;
            match sets.last_mut() {
                Some(last) if last.base_name == base => last.member_paths.push(path),
                _ => sets.push(ArchiveSet {
                    base_name: base,
                    member_paths: vec![path],
                    total_size: total_size as u64,
                    step: Step::from_i64(step),
                    status: Status::from_i64(status),
                    last_log: log,
                }),
            }
        }
        Ok(sets)
    }

    /// 操作员干预：将指定任务清回待处理状态。返回是否确有此任务。
    pub fn reset(&self, base: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store 锁被污染");
        let changed = conn
            .execute(
                "UPDATE base_files SET status = 0, step = 0, log = '' WHERE basename = ?1",
                params![base],
            )
            .with_context(|| format!("重置任务失败: {}", base))?;
        Ok(changed > 0)
    }

    /// 将全部失败任务（status 2/3/4）清回待处理状态，返回重置数量。
    pub fn reset_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("store 锁被污染");
        let changed = conn
            .execute("UPDATE base_files SET status = 0, step = 0, log = '' WHERE status >= 2", [])
            .with_context(|| "重置失败任务失败")?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_status_roundtrip() {
        for v in 0..=4 {
            assert_eq!(Step::from_i64(v).as_i64(), v);
            assert_eq!(Status::from_i64(v).as_i64(), v);
        }
        // 非法值落回初始态
        assert_eq!(Step::from_i64(99), Step::Pending);
        assert_eq!(Status::from_i64(-3), Status::Incomplete);
    }
}
