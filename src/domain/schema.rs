// ==========================================
// 表格数据导入引擎 - 导入字段定义
// ==========================================
// 职责: 声明式描述"列 → 实体属性"的解析方式
// 红线: 纯值对象，构建后不在运行期修改
// ==========================================

use crate::domain::entity::EntityMeta;
use serde::Serialize;
use std::collections::BTreeMap;

// ==========================================
// ScalarType - 标量类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalarType {
    Text,
    Integer,
    Float,
    Boolean,
}

/// 引用键的一个组成列（列名 → 被引用实体上的查找属性）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceColumn {
    pub header: String,
    pub to_attr: String,
}

impl ReferenceColumn {
    pub fn new(header: &str, to_attr: &str) -> Self {
        Self {
            header: header.to_string(),
            to_attr: to_attr.to_string(),
        }
    }
}

/// 扁平嵌套对象的子列（列名 → 关联实体属性）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatColumn {
    pub header: String,
    pub to_attr: String,
    pub required: bool,
}

impl FlatColumn {
    pub fn new(header: &str, to_attr: &str) -> Self {
        Self {
            header: header.to_string(),
            to_attr: to_attr.to_string(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

// ==========================================
// ResolutionKind - 字段解析方式
// ==========================================
// 每个字段只有一种解析方式；FlatNestedObject / Switcher 持有子定义
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResolutionKind {
    /// 单列标量（类型转换）
    Scalar { header: String, scalar: ScalarType },

    /// 单列日期时间（宽松解析）
    DateTimeParsed { header: String },

    /// 按一列或多列查找被引用实体（运行期缓存）
    CachedReference {
        target: EntityMeta,
        columns: Vec<ReferenceColumn>,
    },

    /// 多列组合引用；required_positions 中任一位置为空则整个键视为缺失
    CompositeReference {
        target: EntityMeta,
        columns: Vec<ReferenceColumn>,
        required_positions: Vec<usize>,
    },

    /// 以若干子列描述的关联对象（校验时即保存）
    FlatNestedObject {
        target: EntityMeta,
        columns: Vec<FlatColumn>,
    },

    /// `{prefix}_{subkey}` 列合并进已存储的 JSON 对象
    JsonMerge { prefix: String },

    /// 多个互斥来源，按声明顺序取第一个列齐全的
    Switcher { alternatives: Vec<FieldSpec> },
}

// ==========================================
// FieldSpec - 字段定义
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ResolutionKind,
    pub required: bool,
    pub label: String,
    pub help_text: String,
}

impl FieldSpec {
    pub fn new(name: &str, kind: ResolutionKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            label: name.replace('_', " "),
            help_text: String::new(),
        }
    }

    // ===== 常用构造器 =====

    pub fn scalar(name: &str, header: &str, scalar: ScalarType) -> Self {
        Self::new(
            name,
            ResolutionKind::Scalar {
                header: header.to_string(),
                scalar,
            },
        )
    }

    pub fn text(name: &str) -> Self {
        Self::scalar(name, name, ScalarType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::scalar(name, name, ScalarType::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::scalar(name, name, ScalarType::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::scalar(name, name, ScalarType::Boolean)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(
            name,
            ResolutionKind::DateTimeParsed {
                header: name.to_string(),
            },
        )
    }

    /// 引用字段；columns 为 (列名, 被引用实体属性)
    pub fn reference(name: &str, target: EntityMeta, columns: &[(&str, &str)]) -> Self {
        Self::new(
            name,
            ResolutionKind::CachedReference {
                target,
                columns: columns
                    .iter()
                    .map(|(header, attr)| ReferenceColumn::new(header, attr))
                    .collect(),
            },
        )
    }

    pub fn composite_reference(
        name: &str,
        target: EntityMeta,
        columns: &[(&str, &str)],
        required_positions: &[usize],
    ) -> Self {
        Self::new(
            name,
            ResolutionKind::CompositeReference {
                target,
                columns: columns
                    .iter()
                    .map(|(header, attr)| ReferenceColumn::new(header, attr))
                    .collect(),
                required_positions: required_positions.to_vec(),
            },
        )
    }

    pub fn flat_nested(name: &str, target: EntityMeta, columns: Vec<FlatColumn>) -> Self {
        Self::new(name, ResolutionKind::FlatNestedObject { target, columns })
    }

    pub fn json_merge(name: &str) -> Self {
        Self::new(
            name,
            ResolutionKind::JsonMerge {
                prefix: name.to_string(),
            },
        )
    }

    pub fn switcher(name: &str, alternatives: Vec<FieldSpec>) -> Self {
        Self::new(name, ResolutionKind::Switcher { alternatives })
    }

    // ===== 修饰 =====

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_help_text(mut self, help_text: &str) -> Self {
        self.help_text = help_text.to_string();
        self
    }

    /// 以前缀为来源的字段（与列集合无关，总是参与）
    pub fn is_prefix_sourced(&self) -> bool {
        matches!(
            self.kind,
            ResolutionKind::FlatNestedObject { .. } | ResolutionKind::JsonMerge { .. }
        )
    }

    /// 满足该字段所需的列组（按优先级）
    ///
    /// Switcher 依次展开各备选项的列组；JsonMerge 无固定列组。
    pub fn header_groups(&self) -> Vec<Vec<String>> {
        match &self.kind {
            ResolutionKind::Scalar { header, .. } | ResolutionKind::DateTimeParsed { header } => {
                vec![vec![header.clone()]]
            }
            ResolutionKind::CachedReference { columns, .. }
            | ResolutionKind::CompositeReference { columns, .. } => {
                vec![columns.iter().map(|c| c.header.clone()).collect()]
            }
            ResolutionKind::FlatNestedObject { columns, .. } => {
                vec![columns.iter().map(|c| c.header.clone()).collect()]
            }
            ResolutionKind::JsonMerge { .. } => Vec::new(),
            ResolutionKind::Switcher { alternatives } => alternatives
                .iter()
                .flat_map(|alt| alt.header_groups())
                .collect(),
        }
    }

    /// 该字段对外公布的列说明
    pub fn import_headers(&self) -> Vec<ImportHeader> {
        match &self.kind {
            ResolutionKind::Scalar { header, .. } | ResolutionKind::DateTimeParsed { header } => {
                vec![self.header_for(header, self.required)]
            }
            ResolutionKind::CachedReference { columns, .. }
            | ResolutionKind::CompositeReference { columns, .. } => columns
                .iter()
                .map(|c| self.header_for(&c.header, self.required))
                .collect(),
            ResolutionKind::FlatNestedObject { columns, .. } => columns
                .iter()
                .map(|c| self.header_for(&c.header, c.required))
                .collect(),
            ResolutionKind::JsonMerge { prefix } => {
                vec![self.header_for(&format!("{}_*", prefix), false)]
            }
            ResolutionKind::Switcher { alternatives } => {
                let Some((first, rest)) = alternatives.split_first() else {
                    return Vec::new();
                };
                let mut headers: Vec<ImportHeader> = first
                    .import_headers()
                    .into_iter()
                    .map(|mut h| {
                        h.field_name = self.name.clone();
                        h
                    })
                    .collect();
                if let Some(head) = headers.first_mut() {
                    head.alternatives = rest.iter().map(|alt| alt.import_headers()).collect();
                }
                headers
            }
        }
    }

    fn header_for(&self, name: &str, required: bool) -> ImportHeader {
        ImportHeader {
            name: name.to_string(),
            field_name: self.name.clone(),
            required,
            label: self.label.clone(),
            help_text: self.help_text.clone(),
            alternatives: Vec::new(),
        }
    }
}

// ==========================================
// ImportHeader - 列说明（用于模板/帮助）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportHeader {
    pub name: String,
    pub field_name: String,
    pub required: bool,
    pub label: String,
    pub help_text: String,
    /// 互斥的备选列组（仅挂在字段首列上）
    pub alternatives: Vec<Vec<ImportHeader>>,
}

// ==========================================
// ImporterDefinition - 导入器声明
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImporterDefinition {
    pub entity: EntityMeta,
    pub fields: Vec<FieldSpec>,
    /// 总是参与校验、但不写回实体属性的字段名
    pub virtual_fields: Vec<String>,
    /// 规范列名 → 可接受的别名
    pub soft_headings: BTreeMap<String, Vec<String>>,
    /// 导入人写入的属性（可选）
    pub author_field: Option<String>,
}

impl ImporterDefinition {
    pub fn new(entity: EntityMeta) -> Self {
        Self {
            entity,
            fields: Vec::new(),
            virtual_fields: Vec::new(),
            soft_headings: BTreeMap::new(),
            author_field: None,
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn virtual_field(mut self, spec: FieldSpec) -> Self {
        self.virtual_fields.push(spec.name.clone());
        self.fields.push(spec);
        self
    }

    pub fn soft_heading(mut self, canonical: &str, aliases: &[&str]) -> Self {
        self.soft_headings.insert(
            canonical.to_string(),
            aliases.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn author_field(mut self, attr: &str) -> Self {
        self.author_field = Some(attr.to_string());
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_virtual(&self, name: &str) -> bool {
        self.virtual_fields.iter().any(|v| v == name)
    }

    /// 全部可用列（含备选组与帮助文本），用于生成导入模板
    pub fn available_headers(&self) -> Vec<ImportHeader> {
        self.fields.iter().flat_map(|f| f.import_headers()).collect()
    }

    /// 别名（小写） → 规范列名
    pub fn header_aliases(&self) -> BTreeMap<String, String> {
        let mut aliases = BTreeMap::new();
        for (canonical, alts) in &self.soft_headings {
            for alias in alts {
                aliases.insert(alias.trim().to_lowercase(), canonical.clone());
            }
        }
        aliases
    }
}

// ==========================================
// ImportSchema - 单次导入的字段集合（有序）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSchema {
    pub fields: Vec<FieldSpec>,
}

impl ImportSchema {
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
