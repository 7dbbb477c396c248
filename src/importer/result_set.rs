// ==========================================
// 表格数据导入引擎 - 导入结果集
// ==========================================
// 职责: 按输入顺序保存每行结果，汇总计数，提供错误提取与列投影
// 约束: 只追加；计数在导入结束时设置一次
// ==========================================

use crate::domain::entity::{Entity, Row};
use crate::domain::schema::{ImportSchema, ResolutionKind};
use crate::importer::field_messages::FieldMessages;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 单行错误（或警告）列表: (行号, [(字段, 消息)])
pub type LineMessages = (usize, Vec<(String, Vec<String>)>);

// ==========================================
// ImportCounts - 计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ==========================================
// RowOutcome - 单行结果
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    /// 行号（从 1 开始，跳过的行不计）
    pub line_number: usize,
    pub row: Row,
    pub errors: FieldMessages,
    pub warnings: FieldMessages,
    /// 保存后的实体（失败为 None）
    pub instance: Option<Entity>,
    /// 字段名 → 关联实体
    pub related: BTreeMap<String, Entity>,
    pub virtual_values: BTreeMap<String, Value>,
    /// true = 新建，false = 更新
    pub created: bool,
}

impl RowOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get_errors(&self) -> &[(String, Vec<String>)] {
        self.errors.entries()
    }
}

impl fmt::Display for RowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid = if self.is_valid() { "valid" } else { "invalid" };
        let mode = if self.created { "create" } else { "update" };
        let sample: String = format!("{:?}", self.row.iter().collect::<Vec<_>>())
            .chars()
            .take(100)
            .collect();
        let detail = match (&self.instance, self.is_valid()) {
            (Some(entity), true) => Value::Object(entity.attrs.clone()).to_string(),
            _ => format!("{:?}", self.errors.entries()),
        };
        write!(f, "{}. [{}] [{}] ... {} ... {}", self.line_number, valid, mode, sample, detail)
    }
}

// ==========================================
// ImportResultSet
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct ImportResultSet {
    headers: Vec<String>,
    #[serde(skip)]
    header_schema: ImportSchema,
    results: Vec<RowOutcome>,
    counts: ImportCounts,
    #[serde(skip)]
    counts_set: bool,
}

impl ImportResultSet {
    /// header_schema: 本次导入的新建字段集（用于列投影）
    pub fn new(headers: Vec<String>, header_schema: ImportSchema) -> Self {
        Self {
            headers,
            header_schema,
            results: Vec::new(),
            counts: ImportCounts::default(),
            counts_set: false,
        }
    }

    pub fn append(&mut self, outcome: RowOutcome) -> &RowOutcome {
        self.results.push(outcome);
        &self.results[self.results.len() - 1]
    }

    pub(crate) fn set_counts(&mut self, counts: ImportCounts) {
        if self.counts_set {
            tracing::warn!(?counts, "导入计数重复设置，已忽略");
            return;
        }
        self.counts = counts;
        self.counts_set = true;
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn get_results(&self) -> &[RowOutcome] {
        &self.results
    }

    pub fn get_errors(&self) -> Vec<LineMessages> {
        self.results
            .iter()
            .filter(|r| !r.is_valid())
            .map(|r| (r.line_number, r.errors.entries().to_vec()))
            .collect()
    }

    pub fn get_warnings(&self) -> Vec<LineMessages> {
        self.results
            .iter()
            .filter(|r| !r.warnings.is_empty())
            .map(|r| (r.line_number, r.warnings.entries().to_vec()))
            .collect()
    }

    /// (created, updated, skipped, failed)
    pub fn get_counts(&self) -> (usize, usize, usize, usize) {
        let c = self.counts;
        (c.created, c.updated, c.skipped, c.failed)
    }

    pub fn counts(&self) -> ImportCounts {
        self.counts
    }

    /// 结果展示用的列（扁平嵌套字段展开为子列）
    pub fn import_headers(&self) -> Vec<String> {
        let mut headers = Vec::new();
        for spec in self.header_schema.iter() {
            match &spec.kind {
                ResolutionKind::FlatNestedObject { columns, .. } => {
                    headers.extend(columns.iter().map(|c| c.header.clone()));
                }
                _ => headers.push(spec.name.clone()),
            }
        }
        headers
    }

    /// 与 import_headers 对齐的单行取值
    pub fn instance_values(&self, outcome: &RowOutcome) -> Vec<String> {
        let Some(instance) = &outcome.instance else {
            return self.import_headers().iter().map(|_| String::new()).collect();
        };

        let mut values = Vec::new();
        for spec in self.header_schema.iter() {
            let related = outcome.related.get(&spec.name);
            match &spec.kind {
                ResolutionKind::FlatNestedObject { columns, .. } => {
                    for column in columns {
                        values.push(related.map(|e| e.display_attr(&column.to_attr)).unwrap_or_default());
                    }
                }
                ResolutionKind::CachedReference { columns, .. }
                | ResolutionKind::CompositeReference { columns, .. } => {
                    let value = match related {
                        Some(entity) => columns
                            .iter()
                            .map(|c| entity.display_attr(&c.to_attr))
                            .filter(|v| !v.is_empty())
                            .collect::<Vec<_>>()
                            .join(", "),
                        None => instance.display_attr(&spec.name),
                    };
                    values.push(value);
                }
                _ => {
                    let value = match outcome.virtual_values.get(&spec.name) {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Null) => String::new(),
                        Some(other) => other.to_string(),
                        None => instance.display_attr(&spec.name),
                    };
                    values.push(value);
                }
            }
        }
        values
    }

    /// JSON 报告（计数 + 每行结果）
    pub fn to_report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ImportResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImportResultSet ({} rows, {} errors)",
            self.results.len(),
            self.get_errors().len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::EntityMeta;
    use crate::domain::schema::{FieldSpec, FlatColumn};

    fn outcome(line: usize, errors: FieldMessages, instance: Option<Entity>) -> RowOutcome {
        RowOutcome {
            line_number: line,
            row: Row::new(),
            errors,
            warnings: FieldMessages::new(),
            instance,
            related: BTreeMap::new(),
            virtual_values: BTreeMap::new(),
            created: true,
        }
    }

    #[test]
    fn test_errors_and_display() {
        let mut set = ImportResultSet::new(vec!["name".to_string()], ImportSchema::default());
        set.append(outcome(1, FieldMessages::new(), Some(Entity::new("book").with_id(1))));
        set.append(outcome(2, FieldMessages::single("name", "This field is required."), None));

        let errors = set.get_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 2);
        assert_eq!(errors[0].1[0].0, "name");
        assert_eq!(set.to_string(), "ImportResultSet (2 rows, 1 errors)");
    }

    #[test]
    fn test_counts_set_once() {
        let mut set = ImportResultSet::new(Vec::new(), ImportSchema::default());
        set.set_counts(ImportCounts {
            created: 1,
            updated: 2,
            skipped: 3,
            failed: 4,
        });
        set.set_counts(ImportCounts::default());
        assert_eq!(set.get_counts(), (1, 2, 3, 4));
    }

    #[test]
    fn test_import_headers_and_values() {
        let schema = ImportSchema {
            fields: vec![
                FieldSpec::text("name"),
                FieldSpec::flat_nested(
                    "author",
                    EntityMeta::new("author"),
                    vec![
                        FlatColumn::new("author_name", "name"),
                        FlatColumn::new("author_mobile", "mobile"),
                    ],
                ),
            ],
        };
        let set = ImportResultSet::new(Vec::new(), schema);
        assert_eq!(set.import_headers(), vec!["name", "author_name", "author_mobile"]);

        let mut row = outcome(
            1,
            FieldMessages::new(),
            Some(Entity::new("book").with_id(1).with_attr("name", "Dune").with_attr("author", 5)),
        );
        row.related.insert(
            "author".to_string(),
            Entity::new("author").with_id(5).with_attr("name", "Frank"),
        );
        assert_eq!(set.instance_values(&row), vec!["Dune", "Frank", ""]);
    }
}
