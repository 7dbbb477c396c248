// ==========================================
// 表格数据导入引擎 - 实体存储接口
// ==========================================
// 职责: 定义导入流程所需的存储访问接口（不包含实现）
// 实现者: SqliteEntityStore（entity_record 表）
// ==========================================

use crate::domain::entity::{Entity, EntityId, ID_COLUMN};
use crate::repository::error::{RepositoryError, RepositoryResult};
use serde_json::Value;
use std::fmt;

// ==========================================
// Filter - 等值过滤条件（AND 组合）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<(String, Value)>,
}

impl Filter {
    /// 不带条件（匹配全部）
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, attr: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((attr.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// 内存中判断实体是否满足条件（`id` 对应主键，null 匹配缺失属性）
    pub fn matches(&self, entity: &Entity) -> bool {
        self.conditions.iter().all(|(attr, expected)| {
            if attr == ID_COLUMN {
                return match (entity.id, expected.as_i64()) {
                    (Some(id), Some(want)) => id == want,
                    (None, _) => expected.is_null(),
                    _ => false,
                };
            }
            match entity.get(attr) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            }
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|(attr, value)| format!("{}={}", attr, value))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

// ==========================================
// EntityStore Trait
// ==========================================
// 约束: 保存点须支持嵌套；名称由调用方保证唯一
pub trait EntityStore {
    /// 按主键读取
    ///
    /// # 返回
    /// - Err(NotFound): 记录不存在
    fn get_by_id(&self, entity_type: &str, id: EntityId) -> RepositoryResult<Entity>;

    /// 按等值条件查询（按主键升序）
    fn query(&self, entity_type: &str, filter: &Filter) -> RepositoryResult<Vec<Entity>>;

    /// 保存实体（无 id 则插入），返回带 id 的实体
    fn save(&self, entity: &Entity) -> RepositoryResult<Entity>;

    // ===== 保存点 =====

    fn savepoint(&self, name: &str) -> RepositoryResult<()>;

    fn release_savepoint(&self, name: &str) -> RepositoryResult<()>;

    fn rollback_to_savepoint(&self, name: &str) -> RepositoryResult<()>;

    /// 查询恰好一条记录
    ///
    /// # 返回
    /// - Err(NotFound): 无匹配
    /// - Err(MultipleFound): 多于一条
    fn get_one(&self, entity_type: &str, filter: &Filter) -> RepositoryResult<Entity> {
        let mut found = self.query(entity_type, filter)?;
        match found.len() {
            0 => Err(RepositoryError::NotFound {
                entity: entity_type.to_string(),
                key: filter.to_string(),
            }),
            1 => Ok(found.remove(0)),
            count => Err(RepositoryError::MultipleFound {
                entity: entity_type.to_string(),
                filter: filter.to_string(),
                count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches() {
        let entity = Entity::new("book")
            .with_id(7)
            .with_attr("name", "Dune")
            .with_attr("author", 3);

        assert!(Filter::all().matches(&entity));
        assert!(Filter::all().eq("name", "Dune").eq("author", 3).matches(&entity));
        assert!(Filter::all().eq("id", 7).matches(&entity));
        assert!(!Filter::all().eq("id", 8).matches(&entity));
        assert!(!Filter::all().eq("author", "3").matches(&entity));
        assert!(Filter::all().eq("missing", Value::Null).matches(&entity));
    }

    #[test]
    fn test_filter_display() {
        let filter = Filter::all().eq("name", "Dune").eq("year", json!(1965));
        assert_eq!(filter.to_string(), r#"{name="Dune", year=1965}"#);
    }
}
