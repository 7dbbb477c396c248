// ==========================================
// 表格数据导入引擎 - SQLite 实体存储
// ==========================================
// 存储: entity_record 表（entity_type + JSON 属性）
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化；保存点名称仅允许 [A-Za-z0-9_]
// ==========================================

use crate::db::{ensure_schema, open_in_memory_connection, open_sqlite_connection};
use crate::domain::entity::{Entity, EntityId, ID_COLUMN};
use crate::repository::entity_store::{EntityStore, Filter};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

// ==========================================
// SqliteEntityStore
// ==========================================
pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    /// 打开数据库文件并建表
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 内存库
    pub fn in_memory() -> RepositoryResult<Self> {
        let conn = open_in_memory_connection()?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（与 ConfigManager 共享同一连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            ensure_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    /// 共享连接句柄
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 某类实体的记录数
    pub fn count(&self, entity_type: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_record WHERE entity_type = ?1",
            params![entity_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn decode_attrs(raw: &str) -> RepositoryResult<Map<String, Value>> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(map),
            other => Err(RepositoryError::SerializationError(format!(
                "attrs 不是 JSON 对象: {}",
                other
            ))),
        }
    }
}

/// json_extract 路径（属性名加引号，兼容含特殊字符的名称）
fn json_path(attr: &str) -> String {
    format!("$.\"{}\"", attr.replace('"', "\\\""))
}

/// JSON 值 → SQLite 绑定值（与 json_extract 的返回类型对齐）
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn validate_savepoint_name(name: &str) -> RepositoryResult<()> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::InvalidSavepoint(name.to_string()))
    }
}

// ==========================================
// EntityStore Trait 实现
// ==========================================
impl EntityStore for SqliteEntityStore {
    fn get_by_id(&self, entity_type: &str, id: EntityId) -> RepositoryResult<Entity> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT attrs FROM entity_record WHERE id = ?1 AND entity_type = ?2",
                params![id, entity_type],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(Entity {
                entity_type: entity_type.to_string(),
                id: Some(id),
                attrs: Self::decode_attrs(&raw)?,
            }),
            None => Err(RepositoryError::NotFound {
                entity: entity_type.to_string(),
                key: format!("id={}", id),
            }),
        }
    }

    fn query(&self, entity_type: &str, filter: &Filter) -> RepositoryResult<Vec<Entity>> {
        let mut sql = String::from("SELECT id, attrs FROM entity_record WHERE entity_type = ?1");
        let mut bindings: Vec<SqlValue> = vec![SqlValue::Text(entity_type.to_string())];

        for (attr, value) in &filter.conditions {
            let column = if attr == ID_COLUMN {
                "id".to_string()
            } else {
                bindings.push(SqlValue::Text(json_path(attr)));
                format!("json_extract(attrs, ?{})", bindings.len())
            };

            if value.is_null() {
                sql.push_str(&format!(" AND {} IS NULL", column));
            } else {
                bindings.push(to_sql_value(value));
                sql.push_str(&format!(" AND {} = ?{}", column, bindings.len()));
            }
        }
        sql.push_str(" ORDER BY id");

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bindings.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entities = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            entities.push(Entity {
                entity_type: entity_type.to_string(),
                id: Some(id),
                attrs: Self::decode_attrs(&raw)?,
            });
        }
        Ok(entities)
    }

    fn save(&self, entity: &Entity) -> RepositoryResult<Entity> {
        let attrs = serde_json::to_string(&entity.attrs)?;
        let conn = self.get_conn()?;

        let id = match entity.id {
            None => {
                conn.execute(
                    "INSERT INTO entity_record (entity_type, attrs) VALUES (?1, ?2)",
                    params![entity.entity_type, attrs],
                )?;
                conn.last_insert_rowid()
            }
            Some(id) => {
                let updated = conn.execute(
                    r#"
                    UPDATE entity_record
                    SET attrs = ?1, updated_at = datetime('now')
                    WHERE id = ?2 AND entity_type = ?3
                    "#,
                    params![attrs, id, entity.entity_type],
                )?;
                if updated == 0 {
                    conn.execute(
                        "INSERT INTO entity_record (id, entity_type, attrs) VALUES (?1, ?2, ?3)",
                        params![id, entity.entity_type, attrs],
                    )?;
                }
                id
            }
        };

        let mut saved = entity.clone();
        saved.id = Some(id);
        Ok(saved)
    }

    fn savepoint(&self, name: &str) -> RepositoryResult<()> {
        validate_savepoint_name(name)?;
        let conn = self.get_conn()?;
        conn.execute_batch(&format!("SAVEPOINT {}", name))
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    fn release_savepoint(&self, name: &str) -> RepositoryResult<()> {
        validate_savepoint_name(name)?;
        let conn = self.get_conn()?;
        conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    fn rollback_to_savepoint(&self, name: &str) -> RepositoryResult<()> {
        validate_savepoint_name(name)?;
        let conn = self.get_conn()?;
        conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }
}
