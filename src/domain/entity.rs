// ==========================================
// 表格数据导入引擎 - 实体领域模型
// ==========================================
// 职责: 描述被导入的目标实体（元数据 + 动态属性）
// 约束: 属性以 JSON 值存储，引用字段保存被引用实体的 id
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 实体主键类型
pub type EntityId = i64;

/// 一行原始输入（列名 → 单元格文本）
pub type Row = BTreeMap<String, String>;

/// 行标识列（为空表示新建，非空表示更新）
pub const ID_COLUMN: &str = "id";

// ==========================================
// AttributeKind - 属性类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    Reference,
    Json,
}

// ==========================================
// AttributeSpec - 存储层属性定义
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    pub nullable: bool,    // 允许为空（blank/null）
    pub editable: bool,    // 可编辑（只读属性不参与导入）
    pub has_default: bool, // 存储层有默认值
}

impl AttributeSpec {
    /// 默认: 非空、可编辑、无默认值（即必填）
    pub fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: false,
            editable: true,
            has_default: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    /// 必填 = 非空 且 可编辑 且 无存储默认值
    pub fn is_required(&self) -> bool {
        !self.nullable && self.editable && !self.has_default
    }
}

// ==========================================
// EntityMeta - 实体元数据
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub name: String,
    pub verbose_name: String,
    pub verbose_name_plural: String,
    pub attributes: Vec<AttributeSpec>,
}

impl EntityMeta {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            verbose_name: name.replace('_', " "),
            verbose_name_plural: format!("{}s", name.replace('_', " ")),
            attributes: Vec::new(),
        }
    }

    pub fn with_verbose_name(mut self, singular: &str, plural: &str) -> Self {
        self.verbose_name = singular.to_string();
        self.verbose_name_plural = plural.to_string();
        self
    }

    pub fn attribute(mut self, spec: AttributeSpec) -> Self {
        self.attributes.push(spec);
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// 必填属性（按声明顺序）
    pub fn required_attributes(&self) -> Vec<&AttributeSpec> {
        self.attributes.iter().filter(|a| a.is_required()).collect()
    }

    /// 用于消息展示的单数名称（首字母大写），如 "Book"
    pub fn display_name(&self) -> String {
        title_case(&self.verbose_name)
    }

    /// 用于消息展示的复数名称，如 "Authors"
    pub fn display_name_plural(&self) -> String {
        title_case(&self.verbose_name_plural)
    }
}

fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ==========================================
// Entity - 实体实例
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub id: Option<EntityId>,
    pub attrs: Map<String, Value>,
}

impl Entity {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            id: None,
            attrs: Map::new(),
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Value::as_str)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.attrs.insert(name.to_string(), value);
    }

    /// 读取引用属性中保存的 id（空或非整数返回 None）
    pub fn reference_id(&self, name: &str) -> Option<EntityId> {
        self.attrs.get(name).and_then(Value::as_i64)
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// 属性的展示文本（缺失/null → 空串，对象 → JSON 文本）
    pub fn display_attr(&self, name: &str) -> String {
        match self.attrs.get(name) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}
