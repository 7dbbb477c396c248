// ==========================================
// 表格数据导入引擎 - 引用解析缓存
// ==========================================
// 职责: 按 (字段, 键) 记忆引用查找结果，失败结果同样缓存
// 约束: 生命周期 = 一次导入；同一键最多查询一次
// ==========================================

use crate::domain::entity::{AttributeKind, Entity, EntityId, EntityMeta, ID_COLUMN};
use crate::i18n::t_with_args;
use crate::repository::entity_store::{EntityStore, Filter};
use crate::repository::error::{RepositoryError, RepositoryResult};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// 一次引用查找的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Entity),
    NotFound,
    MultipleFound,
}

impl Lookup {
    /// 失败结果对应的字段错误消息
    pub fn failure_message(&self, target: &EntityMeta, key: &[String]) -> Option<String> {
        let key = display_key(key);
        match self {
            Lookup::Found(_) => None,
            Lookup::NotFound => {
                let entity = target.display_name();
                Some(t_with_args(
                    "reference.not_found",
                    &[("entity", entity.as_str()), ("key", key.as_str())],
                ))
            }
            Lookup::MultipleFound => {
                let entities = target.display_name_plural();
                Some(t_with_args(
                    "reference.multiple_found",
                    &[("entities", entities.as_str()), ("key", key.as_str())],
                ))
            }
        }
    }
}

/// 单列键显示为原值，多列键显示为 "(a, b)"
pub fn display_key(key: &[String]) -> String {
    match key {
        [single] => single.clone(),
        parts => format!("({})", parts.join(", ")),
    }
}

/// 将单元格文本转换为与目标属性类型一致的查询值
pub fn coerce_lookup_value(target: &EntityMeta, attr: &str, raw: &str) -> Value {
    let kind = if attr == ID_COLUMN {
        Some(AttributeKind::Integer)
    } else {
        target.get_attribute(attr).map(|a| a.kind)
    };

    match kind {
        Some(AttributeKind::Integer) | Some(AttributeKind::Reference) => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw)),
        Some(AttributeKind::Float) => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(raw)),
        Some(AttributeKind::Boolean) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => Value::from(raw),
        },
        _ => Value::from(raw),
    }
}

// ==========================================
// FieldResolutionCache
// ==========================================
#[derive(Debug, Default)]
pub struct FieldResolutionCache {
    tables: HashMap<String, HashMap<Vec<String>, Lookup>>,
    query_count: usize,
}

impl FieldResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析引用
    ///
    /// # 参数
    /// - field: 所属字段名（缓存分区）
    /// - target: 被引用实体
    /// - lookups: (查找属性, 单元格文本)，顺序即键的顺序
    ///
    /// # 返回
    /// - Ok(Lookup): 命中或新查询的结果
    /// - Err: 存储层的其它错误（不缓存）
    pub fn resolve<S: EntityStore + ?Sized>(
        &mut self,
        store: &S,
        field: &str,
        target: &EntityMeta,
        lookups: &[(String, String)],
    ) -> RepositoryResult<Lookup> {
        let key: Vec<String> = lookups.iter().map(|(_, raw)| raw.clone()).collect();

        if let Some(hit) = self.tables.get(field).and_then(|table| table.get(&key)) {
            return Ok(hit.clone());
        }

        let filter = lookups.iter().fold(Filter::all(), |filter, (attr, raw)| {
            filter.eq(attr, coerce_lookup_value(target, attr, raw))
        });

        self.query_count += 1;
        debug!(field = %field, key = %display_key(&key), "引用查询");

        let lookup = match store.get_one(&target.name, &filter) {
            Ok(entity) => Lookup::Found(entity),
            Err(RepositoryError::NotFound { .. }) => Lookup::NotFound,
            Err(RepositoryError::MultipleFound { .. }) => Lookup::MultipleFound,
            Err(e) => return Err(e),
        };

        self.tables
            .entry(field.to_string())
            .or_default()
            .insert(key, lookup.clone());
        Ok(lookup)
    }

    /// 已发出的存储查询次数
    pub fn query_count(&self) -> usize {
        self.query_count
    }

    /// 已缓存的键数量（全部字段）
    pub fn cached_keys(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }
}

// ==========================================
// UpdateCache - 预加载的可更新实体（按 id 文本索引）
// ==========================================
#[derive(Debug, Default)]
pub struct UpdateCache {
    entities: HashMap<String, Entity>,
}

impl UpdateCache {
    /// 按过滤条件预加载
    pub fn preload<S: EntityStore + ?Sized>(
        store: &S,
        entity_type: &str,
        filter: &Filter,
    ) -> RepositoryResult<Self> {
        let entities = store
            .query(entity_type, filter)?
            .into_iter()
            .filter_map(|e| e.id.map(|id| (id.to_string(), e)))
            .collect();
        Ok(Self { entities })
    }

    pub fn get(&self, raw_id: &str) -> Option<&Entity> {
        self.entities.get(raw_id.trim())
    }

    /// 以保存后的实体替换预加载的快照（不在范围内的实体忽略）
    pub fn replace(&mut self, entity: Entity) {
        let Some(id) = entity.id else {
            return;
        };
        if let Some(slot) = self.entities.get_mut(&id.to_string()) {
            *slot = entity;
        }
    }

    pub fn contains_id(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
