// ==========================================
// 表格数据导入引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{ensure_schema, open_sqlite_connection};
use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// 默认作用域
const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = open_sqlite_connection(db_path)
            .with_context(|| format!("打开配置库失败: {}", db_path))?;
        ensure_schema(&conn).context("初始化配置表失败")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> anyhow::Result<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| anyhow!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
            ensure_schema(&conn_guard).context("初始化配置表失败")?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("锁获取失败: {}", e))?;

        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![GLOBAL_SCOPE, key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .with_context(|| format!("读取配置失败 (key: {})", key))
    }

    /// 写入 global 配置（存在则覆盖）
    pub fn set_value(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("锁获取失败: {}", e))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
            params![GLOBAL_SCOPE, key, value],
        )
        .with_context(|| format!("写入配置失败 (key: {})", key))?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> anyhow::Result<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

// ==========================================
// ImportConfigReader Trait 实现
// ==========================================
impl ImportConfigReader for ConfigManager {
    fn get_middle_endian(&self) -> anyhow::Result<bool> {
        let value = self.get_config_or_default(config_keys::MIDDLE_ENDIAN, "false")?;
        match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            _ => {
                tracing::warn!(
                    config_key = config_keys::MIDDLE_ENDIAN,
                    raw_value = %value,
                    "日期端序配置格式错误，使用默认值 false"
                );
                Ok(false)
            }
        }
    }

    fn get_header_aliases(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let value = self.get_config_or_default(config_keys::HEADER_ALIASES, "{}")?;
        let aliases: BTreeMap<String, String> = serde_json::from_str(&value).unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::HEADER_ALIASES,
                raw_value = %value,
                "列名别名配置格式错误，使用空配置"
            );
            BTreeMap::new()
        });

        Ok(aliases
            .into_iter()
            .map(|(alias, canonical)| (alias.trim().to_lowercase(), canonical))
            .collect())
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 日期解析
    pub const MIDDLE_ENDIAN: &str = "import/middle_endian";

    // 列名别名 (JSON: {"别名": "规范列名"})
    pub const HEADER_ALIASES: &str = "import/header_aliases";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;

    fn manager() -> ConfigManager {
        let conn = open_in_memory_connection().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_unset() {
        let manager = manager();
        let settings = manager.load_import_settings().unwrap();
        assert!(!settings.middle_endian);
        assert!(settings.header_aliases.is_empty());
    }

    #[test]
    fn test_set_value_overrides() {
        let manager = manager();
        manager.set_value(config_keys::MIDDLE_ENDIAN, "true").unwrap();
        assert!(manager.get_middle_endian().unwrap());

        manager.set_value(config_keys::MIDDLE_ENDIAN, "no").unwrap();
        assert!(!manager.get_middle_endian().unwrap());
    }

    #[test]
    fn test_header_aliases_normalized() {
        let manager = manager();
        manager
            .set_value(config_keys::HEADER_ALIASES, r#"{" Title ": "name"}"#)
            .unwrap();

        let aliases = manager.get_header_aliases().unwrap();
        assert_eq!(aliases.get("title"), Some(&"name".to_string()));
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let manager = manager();
        manager.set_value(config_keys::MIDDLE_ENDIAN, "maybe").unwrap();
        manager.set_value(config_keys::HEADER_ALIASES, "not json").unwrap();

        let settings = manager.load_import_settings().unwrap();
        assert!(!settings.middle_endian);
        assert!(settings.header_aliases.is_empty());
    }
}
