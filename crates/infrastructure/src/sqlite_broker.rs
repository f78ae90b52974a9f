use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use taskq_core::{
    errors::{TaskqError, TaskqResult},
    models::QueueEntry,
    traits::{Broker, BrokerCapability},
};

/// 本地文件消息代理
///
/// 消息存放在 SQLite 的 `messages` 表中，按自增ID排序，支持分页读取和按ID删除。
pub struct SqliteDocumentBroker {
    pool: SqlitePool,
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> TaskqError + '_ {
    move |e| TaskqError::broker(context, e)
}

impl SqliteDocumentBroker {
    /// 打开（必要时创建）数据库文件，`path` 可以是文件路径或 `:memory:`
    pub async fn new(path: &str) -> TaskqResult<Self> {
        debug!("打开SQLite消息存储: {}", path);

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
            .map_err(|e| TaskqError::Configuration(format!("无效的SQLite路径 {path}: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // 内存库每个连接都是独立的数据库，只能使用单连接
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(db_error("连接SQLite失败"))?;

        Self::run_migrations(&pool).await?;

        info!("SQLite消息存储已就绪: {}", path);
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> TaskqResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                payload BLOB NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(db_error("创建messages表失败"))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_queue ON messages(queue, id)")
            .execute(pool)
            .await
            .map_err(db_error("创建messages索引失败"))?;

        Ok(())
    }
}

#[async_trait]
impl Broker for SqliteDocumentBroker {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn capability(&self) -> BrokerCapability {
        BrokerCapability::Paged
    }

    async fn ping(&self) -> TaskqResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("SQLite健康检查失败"))?;
        Ok(())
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
        sqlx::query("INSERT INTO messages (queue, payload) VALUES (?, ?)")
            .bind(queue)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(db_error("写入消息失败"))?;
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
        let row = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE id = (SELECT id FROM messages WHERE queue = ? ORDER BY id LIMIT 1)
            RETURNING payload
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("弹出消息失败"))?;

        row.map(|row| row.try_get::<Vec<u8>, _>("payload"))
            .transpose()
            .map_err(db_error("读取消息内容失败"))
    }

    async fn length(&self, queue: &str) -> TaskqResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("统计队列长度失败"))?;
        Ok(count.max(0) as usize)
    }

    async fn paged_read(
        &self,
        queue: &str,
        offset: usize,
        limit: usize,
    ) -> TaskqResult<Vec<QueueEntry>> {
        let rows = sqlx::query(
            "SELECT id, payload FROM messages WHERE queue = ? ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(queue)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("分页读取消息失败"))?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let payload: Vec<u8> = row.try_get("payload")?;
                Ok(QueueEntry::new(id.to_string(), payload))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(db_error("解析消息记录失败"))
    }

    async fn delete_by_ids(&self, queue: &str, ids: &[String]) -> TaskqResult<usize> {
        let ids: Vec<i64> = ids.iter().filter_map(|id| id.parse().ok()).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM messages WHERE queue = ");
        builder.push_bind(queue).push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(db_error("删除消息失败"))?;
        Ok(result.rows_affected() as usize)
    }

    async fn flush(&self, queue: &str) -> TaskqResult<()> {
        let result = sqlx::query("DELETE FROM messages WHERE queue = ?")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(db_error("清空队列失败"))?;
        debug!("队列 {} 已清空 (删除 {} 条)", queue, result.rows_affected());
        Ok(())
    }
}
