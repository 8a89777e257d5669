use sqlx::{Result, SqlitePool};

use super::{Record, RecordRow};

/// 在一个事务中批量添加记录，返回写入的行数
pub async fn add_records(executor: &SqlitePool, records: &[Record]) -> Result<u64> {
    let mut tx = executor.begin().await?;
    let mut inserted = 0;
    for record in records {
        let fingerprint = record.fingerprint.map(|fp| fp.to_string());
        inserted += sqlx::query(
            r#"
            INSERT INTO record (path, fingerprint)
            VALUES (?, ?)
            "#,
        )
        .bind(&record.identifier)
        .bind(fingerprint)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// 查询记录总数
pub async fn count_records(executor: &SqlitePool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM record
        "#,
    )
    .fetch_one(executor)
    .await?;

    Ok(count as u64)
}

/// 按插入顺序分页获取记录
///
/// NOTE: 必须按 id 排序，否则 SQLite 不保证多次查询之间的顺序一致，分页时可能重复或遗漏
pub async fn get_records(executor: &SqlitePool, limit: u64, offset: u64) -> Result<Vec<RecordRow>> {
    let limit = limit as i64;
    let offset = offset as i64;
    let rows = sqlx::query_as::<_, RecordRow>(
        r#"
        SELECT path, fingerprint FROM record
        ORDER BY id ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
