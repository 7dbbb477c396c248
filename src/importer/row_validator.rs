// ==========================================
// 表格数据导入引擎 - 行校验器
// ==========================================
// 流程:
// 1. 规范化: 扁平嵌套对象的子列先行处理（校验即保存关联对象）
// 2. 按字段集顺序逐字段解析，收集全部错误（不提前终止）
// 3. 写入导入人属性
// 约束: 警告与错误分开收集，警告不影响有效性
// ==========================================

use crate::domain::entity::{Entity, EntityId, EntityMeta, Row};
use crate::domain::schema::{FieldSpec, FlatColumn, ImportSchema, ImporterDefinition, ResolutionKind, ScalarType};
use crate::i18n::{t, t_with_args};
use crate::importer::date_parser::DateParser;
use crate::importer::field_messages::FieldMessages;
use crate::importer::field_resolver::{resolve_field, Resolution, ResolveContext};
use crate::importer::resolution_cache::{coerce_lookup_value, FieldResolutionCache};
use crate::repository::entity_store::EntityStore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// 一行的校验结果
#[derive(Debug, Clone)]
pub struct ValidatedRow {
    /// 已赋值（尚未保存）的目标实体
    pub entity: Entity,
    /// 字段名 → 关联实体（引用解析或嵌套保存所得）
    pub related: BTreeMap<String, Entity>,
    /// 虚拟字段的解析值
    pub virtual_values: BTreeMap<String, Value>,
    pub errors: FieldMessages,
    pub warnings: FieldMessages,
}

impl ValidatedRow {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 嵌套对象规范化结果
type NestedOutcome = Result<Resolution, FieldMessages>;

// ==========================================
// RowValidator
// ==========================================
pub struct RowValidator<'a, S: EntityStore + ?Sized> {
    store: &'a S,
    definition: &'a ImporterDefinition,
    date_parser: DateParser,
}

impl<'a, S: EntityStore + ?Sized> RowValidator<'a, S> {
    pub fn new(store: &'a S, definition: &'a ImporterDefinition, date_parser: DateParser) -> Self {
        Self {
            store,
            definition,
            date_parser,
        }
    }

    /// 校验一行
    ///
    /// # 参数
    /// - existing: 更新时的已有实体（新建为 None）
    /// - author: 导入人（写入声明的 author_field）
    ///
    /// # 返回
    /// - Err: 存储层异常（由调用方决定如何记录）
    pub fn validate(
        &self,
        cache: &mut FieldResolutionCache,
        row: &Row,
        schema: &ImportSchema,
        existing: Option<&Entity>,
        author: Option<EntityId>,
    ) -> RepositoryResult<ValidatedRow> {
        let mut entity = existing
            .cloned()
            .unwrap_or_else(|| Entity::new(&self.definition.entity.name));
        let mut related = BTreeMap::new();
        let mut virtual_values = BTreeMap::new();
        let mut errors = FieldMessages::new();
        let mut warnings = FieldMessages::new();

        // ===== 1. 规范化: 扁平嵌套对象 =====
        let mut nested: BTreeMap<String, NestedOutcome> = BTreeMap::new();
        for spec in schema.iter() {
            if let ResolutionKind::FlatNestedObject { target, columns } = &spec.kind {
                let outcome = self.normalize_nested(spec, target, columns, row, existing)?;
                nested.insert(spec.name.clone(), outcome);
            }
        }

        // ===== 2. 逐字段解析 =====
        for spec in schema.iter() {
            let resolution = match nested.remove(&spec.name) {
                Some(Ok(resolution)) => resolution,
                Some(Err(nested_errors)) => {
                    errors.extend(nested_errors);
                    continue;
                }
                None => {
                    let mut ctx = ResolveContext {
                        store: self.store,
                        cache: &mut *cache,
                        date_parser: self.date_parser,
                        existing,
                        warnings: &mut warnings,
                    };
                    resolve_field(&mut ctx, spec, row)?
                }
            };

            let is_virtual = self.definition.is_virtual(&spec.name);
            match resolution {
                Resolution::Value(value) => {
                    if is_virtual {
                        virtual_values.insert(spec.name.clone(), value);
                    } else {
                        entity.set(&spec.name, value);
                    }
                }
                Resolution::Reference(target) => {
                    let id = target.id.map(Value::from).unwrap_or(Value::Null);
                    if is_virtual {
                        virtual_values.insert(spec.name.clone(), id);
                    } else {
                        entity.set(&spec.name, id);
                    }
                    related.insert(spec.name.clone(), target);
                }
                Resolution::Blank if spec.required => {
                    errors.add(&spec.name, t("field.required"));
                }
                // 更新时未提供的列保留已有值
                Resolution::Absent if spec.required && existing.is_none() => {
                    errors.add(&spec.name, t("field.required"));
                }
                Resolution::Blank => {
                    let value = blank_value(spec);
                    related.remove(&spec.name);
                    if is_virtual {
                        virtual_values.insert(spec.name.clone(), value);
                    } else {
                        entity.set(&spec.name, value);
                    }
                }
                Resolution::Absent => {}
                Resolution::Invalid(message) => errors.add(&spec.name, message),
            }
        }

        // ===== 3. 导入人 =====
        if let (Some(attr), Some(author)) = (&self.definition.author_field, author) {
            entity.set(attr, Value::from(author));
        }

        Ok(ValidatedRow {
            entity,
            related,
            virtual_values,
            errors,
            warnings,
        })
    }

    /// 扁平嵌套对象: 收集子列 → 修改已关联对象或新建 → 立即保存
    fn normalize_nested(
        &self,
        spec: &FieldSpec,
        target: &EntityMeta,
        columns: &[FlatColumn],
        row: &Row,
        existing: Option<&Entity>,
    ) -> RepositoryResult<NestedOutcome> {
        let present: Vec<(&FlatColumn, &str)> = columns
            .iter()
            .filter_map(|c| row.get(&c.header).map(|raw| (c, raw.trim())))
            .collect();
        if present.is_empty() {
            return Ok(Ok(Resolution::Absent));
        }

        let current = match existing.and_then(|e| e.reference_id(&spec.name)) {
            Some(id) => match self.store.get_by_id(&target.name, id) {
                Ok(entity) => Some(entity),
                Err(RepositoryError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        if current.is_none() && present.iter().all(|(_, raw)| raw.is_empty()) {
            return Ok(Ok(Resolution::Blank));
        }

        let is_new = current.is_none();
        let mut related = current.unwrap_or_else(|| Entity::new(&target.name));
        let mut sub_errors = FieldMessages::new();

        for column in columns {
            let raw = row.get(&column.header).map(|r| r.trim()).unwrap_or("");
            if raw.is_empty() {
                if is_new && column.required {
                    sub_errors.add(&column.header, t("field.required"));
                }
                continue;
            }
            related.set(&column.to_attr, coerce_lookup_value(target, &column.to_attr, raw));
        }

        if !sub_errors.is_empty() {
            return Ok(Err(sub_errors));
        }

        match self.store.save(&related) {
            Ok(saved) => {
                debug!(
                    field = %spec.name,
                    entity = %target.name,
                    id = ?saved.id,
                    created = is_new,
                    "嵌套对象已保存"
                );
                Ok(Ok(Resolution::Reference(saved)))
            }
            Err(e) => {
                let entity = target.display_name();
                let error = e.to_string();
                Ok(Err(FieldMessages::single(
                    &spec.name,
                    t_with_args(
                        "nested.save_failed",
                        &[("entity", entity.as_str()), ("error", error.as_str())],
                    ),
                )))
            }
        }
    }
}

/// 非必填字段为空时写入的值（文本为空串，其余为 null）
fn blank_value(spec: &FieldSpec) -> Value {
    match &spec.kind {
        ResolutionKind::Scalar {
            scalar: ScalarType::Text,
            ..
        } => Value::String(String::new()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{AttributeKind, AttributeSpec};
    use crate::importer::schema_builder::SchemaBuilder;
    use crate::repository::sqlite_store::SqliteEntityStore;
    use serde_json::json;

    fn author_meta() -> EntityMeta {
        EntityMeta::new("author")
            .attribute(AttributeSpec::new("name", AttributeKind::Text))
            .attribute(AttributeSpec::new("mobile", AttributeKind::Text).nullable())
    }

    fn definition() -> ImporterDefinition {
        let book = EntityMeta::new("book")
            .attribute(AttributeSpec::new("name", AttributeKind::Text))
            .attribute(AttributeSpec::new("pages", AttributeKind::Integer).nullable())
            .attribute(AttributeSpec::new("published", AttributeKind::DateTime).nullable())
            .attribute(AttributeSpec::new("author", AttributeKind::Reference).nullable());

        ImporterDefinition::new(book)
            .field(FieldSpec::text("name"))
            .field(FieldSpec::integer("pages"))
            .field(FieldSpec::datetime("published"))
            .field(FieldSpec::reference("author", author_meta(), &[("author", "name")]))
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn headers(r: &Row) -> Vec<String> {
        r.keys().cloned().collect()
    }

    #[test]
    fn test_collects_all_errors() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let def = definition();
        let r = row(&[("name", ""), ("pages", "many"), ("published", "soon"), ("author", "Nobody")]);
        let (_, create) = SchemaBuilder::new(&def).build(&headers(&r));

        let validator = RowValidator::new(&store, &def, DateParser::default());
        let mut cache = FieldResolutionCache::new();
        let result = validator.validate(&mut cache, &r, &create, None, None).unwrap();

        assert!(!result.is_valid());
        assert_eq!(result.errors.get("name").unwrap(), ["This field is required."]);
        assert_eq!(result.errors.get("pages").unwrap(), ["Enter a whole number."]);
        assert_eq!(result.errors.get("published").unwrap(), ["Enter a valid date/time."]);
        assert_eq!(result.errors.get("author").unwrap(), ["No Author matching 'Nobody'."]);
    }

    #[test]
    fn test_values_and_warnings() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let ann = store.save(&Entity::new("author").with_attr("name", "Ann")).unwrap();
        let def = definition();
        let r = row(&[("name", "Dune"), ("pages", ""), ("published", "01/02/03"), ("author", "Ann")]);
        let (_, create) = SchemaBuilder::new(&def).build(&headers(&r));

        let validator = RowValidator::new(&store, &def, DateParser::default());
        let mut cache = FieldResolutionCache::new();
        let result = validator.validate(&mut cache, &r, &create, None, None).unwrap();

        assert!(result.is_valid());
        assert_eq!(result.entity.get("name"), Some(&json!("Dune")));
        assert_eq!(result.entity.get("pages"), Some(&Value::Null));
        assert_eq!(result.entity.get("published"), Some(&json!("2003-02-01T00:00:00")));
        assert_eq!(result.entity.reference_id("author"), ann.id);
        assert_eq!(result.related.get("author").unwrap().get_str("name"), Some("Ann"));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings.get("published").is_some());
    }

    #[test]
    fn test_nested_object_created_and_updated() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let book = EntityMeta::new("book")
            .attribute(AttributeSpec::new("name", AttributeKind::Text))
            .attribute(AttributeSpec::new("author", AttributeKind::Reference).nullable());
        let def = ImporterDefinition::new(book)
            .field(FieldSpec::text("name"))
            .field(FieldSpec::flat_nested(
                "author",
                author_meta(),
                vec![
                    FlatColumn::new("author_name", "name").required(),
                    FlatColumn::new("author_mobile", "mobile"),
                ],
            ));
        let validator = RowValidator::new(&store, &def, DateParser::default());
        let mut cache = FieldResolutionCache::new();

        let r = row(&[("name", "Dune"), ("author_name", "Frank"), ("author_mobile", "555")]);
        let (_, create) = SchemaBuilder::new(&def).build(&headers(&r));
        let created = validator.validate(&mut cache, &r, &create, None, None).unwrap();
        assert!(created.is_valid());
        let author_id = created.entity.reference_id("author").unwrap();

        // 更新时只给出部分子列，其它子列保持不变
        let existing = created.entity.clone().with_id(1);
        let r = row(&[("name", "Dune"), ("author_name", "Frank Herbert")]);
        let (update, _) = SchemaBuilder::new(&def).build(&headers(&r));
        let updated = validator
            .validate(&mut cache, &r, &update, Some(&existing), None)
            .unwrap();
        assert!(updated.is_valid());
        assert_eq!(updated.entity.reference_id("author"), Some(author_id));

        let author = store.get_by_id("author", author_id).unwrap();
        assert_eq!(author.get_str("name"), Some("Frank Herbert"));
        assert_eq!(author.get_str("mobile"), Some("555"));
    }

    #[test]
    fn test_nested_required_sub_column() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let def = ImporterDefinition::new(EntityMeta::new("book")).field(FieldSpec::flat_nested(
            "author",
            author_meta(),
            vec![
                FlatColumn::new("author_name", "name").required(),
                FlatColumn::new("author_mobile", "mobile"),
            ],
        ));
        let validator = RowValidator::new(&store, &def, DateParser::default());
        let mut cache = FieldResolutionCache::new();

        let r = row(&[("author_mobile", "555")]);
        let (_, create) = SchemaBuilder::new(&def).build(&headers(&r));
        let result = validator.validate(&mut cache, &r, &create, None, None).unwrap();

        assert_eq!(result.errors.get("author_name").unwrap(), ["This field is required."]);
        assert_eq!(store.count("author").unwrap(), 0);
    }

    #[test]
    fn test_author_and_virtual_fields() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let book = EntityMeta::new("book")
            .attribute(AttributeSpec::new("name", AttributeKind::Text))
            .attribute(AttributeSpec::new("created_by", AttributeKind::Reference).nullable());
        let def = ImporterDefinition::new(book)
            .field(FieldSpec::text("name"))
            .virtual_field(FieldSpec::text("batch"))
            .author_field("created_by");
        let validator = RowValidator::new(&store, &def, DateParser::default());
        let mut cache = FieldResolutionCache::new();

        let r = row(&[("name", "Dune"), ("batch", "b-7")]);
        let (_, create) = SchemaBuilder::new(&def).build(&headers(&r));
        let result = validator.validate(&mut cache, &r, &create, None, Some(9)).unwrap();

        assert_eq!(result.entity.get("created_by"), Some(&json!(9)));
        assert_eq!(result.entity.get("batch"), None);
        assert_eq!(result.virtual_values.get("batch"), Some(&json!("b-7")));
    }
}
