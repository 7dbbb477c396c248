// ==========================================
// 表格数据导入引擎 - 字段解析策略
// ==========================================
// 职责: 按解析方式（ResolutionKind）把一行中的源列转换为属性值
// 约束: 只读取行与已有实体，不写入实体；扁平嵌套对象由 RowValidator 预处理
// ==========================================

use crate::domain::entity::{Entity, EntityMeta, Row};
use crate::domain::schema::{FieldSpec, ReferenceColumn, ResolutionKind, ScalarType};
use crate::i18n::{t, t_with_args};
use crate::importer::date_parser::DateParser;
use crate::importer::field_messages::FieldMessages;
use crate::importer::resolution_cache::{FieldResolutionCache, Lookup};
use crate::repository::entity_store::EntityStore;
use crate::repository::error::RepositoryResult;
use serde_json::{Map, Value};

/// 单个字段的解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// 写入属性值
    Value(Value),
    /// 写入被引用实体的 id，并记录该实体
    Reference(Entity),
    /// 源列存在但为空
    Blank,
    /// 源列不存在（不写入）
    Absent,
    /// 字段错误
    Invalid(String),
}

/// 解析上下文（一行内共享）
pub struct ResolveContext<'a, S: EntityStore + ?Sized> {
    pub store: &'a S,
    pub cache: &'a mut FieldResolutionCache,
    pub date_parser: DateParser,
    pub existing: Option<&'a Entity>,
    pub warnings: &'a mut FieldMessages,
}

pub fn is_blank(raw: &str) -> bool {
    raw.trim().is_empty()
}

/// 按解析方式分派
///
/// # 返回
/// - Err: 存储层异常（非"未找到/不唯一"）
pub fn resolve_field<S: EntityStore + ?Sized>(
    ctx: &mut ResolveContext<'_, S>,
    spec: &FieldSpec,
    row: &Row,
) -> RepositoryResult<Resolution> {
    match &spec.kind {
        ResolutionKind::Scalar { header, scalar } => Ok(resolve_scalar(row, header, *scalar)),
        ResolutionKind::DateTimeParsed { header } => Ok(resolve_datetime(ctx, &spec.name, row, header)),
        ResolutionKind::CachedReference { target, columns } => {
            resolve_reference(ctx, &spec.name, target, columns, row)
        }
        ResolutionKind::CompositeReference {
            target,
            columns,
            required_positions,
        } => resolve_composite(ctx, &spec.name, target, columns, required_positions, row),
        ResolutionKind::JsonMerge { prefix } => Ok(resolve_json_merge(ctx.existing, &spec.name, prefix, row)),
        ResolutionKind::Switcher { alternatives } => {
            let chosen = alternatives.iter().find(|alt| {
                alt.header_groups()
                    .iter()
                    .any(|group| !group.is_empty() && group.iter().all(|h| row.contains_key(h)))
            });
            match chosen {
                // 嵌套对象不能作为备选来源
                Some(alt) if !matches!(alt.kind, ResolutionKind::FlatNestedObject { .. }) => {
                    resolve_field(ctx, alt, row)
                }
                _ => Ok(Resolution::Absent),
            }
        }
        ResolutionKind::FlatNestedObject { .. } => Ok(Resolution::Absent),
    }
}

// ===== 标量 =====

pub fn resolve_scalar(row: &Row, header: &str, scalar: ScalarType) -> Resolution {
    let Some(raw) = row.get(header) else {
        return Resolution::Absent;
    };
    if is_blank(raw) {
        return Resolution::Blank;
    }
    let text = raw.trim();

    match scalar {
        ScalarType::Text => Resolution::Value(Value::String(text.to_string())),
        ScalarType::Integer => match parse_integer(text) {
            Some(n) => Resolution::Value(Value::from(n)),
            None => Resolution::Invalid(t("field.invalid_integer")),
        },
        ScalarType::Float => match text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            Some(n) => Resolution::Value(Value::Number(n)),
            None => Resolution::Invalid(t("field.invalid_float")),
        },
        ScalarType::Boolean => match text.to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" | "on" => Resolution::Value(Value::Bool(true)),
            "false" | "f" | "no" | "n" | "0" | "off" => Resolution::Value(Value::Bool(false)),
            _ => Resolution::Invalid(t("field.invalid_boolean")),
        },
    }
}

/// 整数（允许 "3.0" 这类无小数部分的写法）
fn parse_integer(text: &str) -> Option<i64> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(n);
    }
    let f = text.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

// ===== 日期时间 =====

fn resolve_datetime<S: EntityStore + ?Sized>(
    ctx: &mut ResolveContext<'_, S>,
    field: &str,
    row: &Row,
    header: &str,
) -> Resolution {
    let Some(raw) = row.get(header) else {
        return Resolution::Absent;
    };
    match ctx.date_parser.parse(raw) {
        Ok(None) => Resolution::Blank,
        Ok(Some(parsed)) => {
            if parsed.ambiguous {
                let read_as = parsed.value.format("%Y-%m-%d").to_string();
                ctx.warnings.add(
                    field,
                    t_with_args(
                        "field.ambiguous_date",
                        &[("value", raw.trim()), ("parsed", read_as.as_str())],
                    ),
                );
            }
            Resolution::Value(Value::String(parsed.formatted()))
        }
        Err(_) => Resolution::Invalid(t("field.invalid_datetime")),
    }
}

// ===== 引用 =====

fn lookup_resolution(lookup: Lookup, target: &EntityMeta, key: &[String]) -> Resolution {
    match lookup.failure_message(target, key) {
        Some(message) => Resolution::Invalid(message),
        None => match lookup {
            Lookup::Found(entity) => Resolution::Reference(entity),
            _ => Resolution::Absent,
        },
    }
}

fn resolve_reference<S: EntityStore + ?Sized>(
    ctx: &mut ResolveContext<'_, S>,
    field: &str,
    target: &EntityMeta,
    columns: &[ReferenceColumn],
    row: &Row,
) -> RepositoryResult<Resolution> {
    let mut lookups = Vec::with_capacity(columns.len());
    for column in columns {
        let Some(raw) = row.get(&column.header) else {
            return Ok(Resolution::Absent);
        };
        if is_blank(raw) {
            return Ok(Resolution::Blank);
        }
        lookups.push((column.to_attr.clone(), raw.trim().to_string()));
    }

    let key: Vec<String> = lookups.iter().map(|(_, raw)| raw.clone()).collect();
    let lookup = ctx.cache.resolve(ctx.store, field, target, &lookups)?;
    Ok(lookup_resolution(lookup, target, &key))
}

fn resolve_composite<S: EntityStore + ?Sized>(
    ctx: &mut ResolveContext<'_, S>,
    field: &str,
    target: &EntityMeta,
    columns: &[ReferenceColumn],
    required_positions: &[usize],
    row: &Row,
) -> RepositoryResult<Resolution> {
    if columns.iter().all(|c| !row.contains_key(&c.header)) {
        return Ok(Resolution::Absent);
    }

    let is_required_position =
        |idx: usize| required_positions.is_empty() || required_positions.contains(&idx);

    let mut lookups = Vec::new();
    for (idx, column) in columns.iter().enumerate() {
        let value = row.get(&column.header).filter(|raw| !is_blank(raw));
        match value {
            Some(raw) => lookups.push((column.to_attr.clone(), raw.trim().to_string())),
            // 必需位置为空: 整个键视为缺失
            None if is_required_position(idx) => return Ok(Resolution::Blank),
            None => {}
        }
    }

    let key: Vec<String> = lookups.iter().map(|(_, raw)| raw.clone()).collect();
    let lookup = ctx.cache.resolve(ctx.store, field, target, &lookups)?;
    Ok(lookup_resolution(lookup, target, &key))
}

// ===== JSON 合并 =====

/// 读取已存储的 JSON 对象（兼容以文本保存的 JSON）
fn stored_object(existing: Option<&Entity>, field: &str) -> Option<Map<String, Value>> {
    match existing?.get(field)? {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// `{prefix}_{subkey}` 列浅合并进已有对象，新值覆盖旧值
pub fn resolve_json_merge(existing: Option<&Entity>, field: &str, prefix: &str, row: &Row) -> Resolution {
    let column_prefix = format!("{}_", prefix);
    let incoming: Vec<(String, String)> = row
        .iter()
        .filter_map(|(header, raw)| {
            let subkey = header.strip_prefix(&column_prefix)?;
            if subkey.is_empty() || is_blank(raw) {
                return None;
            }
            Some((subkey.to_string(), raw.trim().to_string()))
        })
        .collect();

    let stored = stored_object(existing, field);
    if incoming.is_empty() && stored.is_some() {
        return Resolution::Absent;
    }

    let mut merged = stored.unwrap_or_default();
    for (subkey, value) in incoming {
        merged.insert(subkey, Value::String(value));
    }
    Resolution::Value(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{AttributeKind, AttributeSpec};
    use crate::repository::sqlite_store::SqliteEntityStore;
    use serde_json::json;

    fn author_meta() -> EntityMeta {
        EntityMeta::new("author")
            .attribute(AttributeSpec::new("name", AttributeKind::Text))
            .attribute(AttributeSpec::new("code", AttributeKind::Integer).nullable())
            .attribute(AttributeSpec::new("first", AttributeKind::Text).nullable())
            .attribute(AttributeSpec::new("last", AttributeKind::Text).nullable())
    }

    fn save_author(store: &SqliteEntityStore, name: &str, code: i64, first: &str, last: &str) -> Entity {
        store
            .save(
                &Entity::new("author")
                    .with_attr("name", name)
                    .with_attr("code", code)
                    .with_attr("first", first)
                    .with_attr("last", last),
            )
            .unwrap()
    }

    fn resolve(store: &SqliteEntityStore, spec: &FieldSpec, r: &Row) -> Resolution {
        let mut cache = FieldResolutionCache::new();
        let mut warnings = FieldMessages::new();
        let mut ctx = ResolveContext {
            store,
            cache: &mut cache,
            date_parser: DateParser::default(),
            existing: None,
            warnings: &mut warnings,
        };
        resolve_field(&mut ctx, spec, r).unwrap()
    }

    fn resolved_name(resolution: Resolution) -> Option<String> {
        match resolution {
            Resolution::Reference(entity) => entity.get_str("name").map(str::to_string),
            _ => None,
        }
    }

    fn author_switcher() -> FieldSpec {
        FieldSpec::switcher(
            "author",
            vec![
                FieldSpec::reference("author", author_meta(), &[("author_code", "code")]),
                FieldSpec::reference("author", author_meta(), &[("author", "name")]),
            ],
        )
    }

    fn author_by_full_name() -> FieldSpec {
        FieldSpec::composite_reference(
            "author",
            author_meta(),
            &[("author_first", "first"), ("author_last", "last")],
            &[1],
        )
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_scalar_coercion() {
        let r = row(&[("n", " 42 "), ("f", "2.5"), ("b", "Yes"), ("bad", "x"), ("blank", " ")]);

        assert_eq!(resolve_scalar(&r, "n", ScalarType::Integer), Resolution::Value(json!(42)));
        assert_eq!(resolve_scalar(&r, "f", ScalarType::Float), Resolution::Value(json!(2.5)));
        assert_eq!(resolve_scalar(&r, "b", ScalarType::Boolean), Resolution::Value(json!(true)));
        assert_eq!(
            resolve_scalar(&r, "bad", ScalarType::Integer),
            Resolution::Invalid("Enter a whole number.".to_string())
        );
        assert_eq!(resolve_scalar(&r, "blank", ScalarType::Text), Resolution::Blank);
        assert_eq!(resolve_scalar(&r, "missing", ScalarType::Text), Resolution::Absent);
    }

    #[test]
    fn test_integer_accepts_whole_decimal() {
        assert_eq!(parse_integer("3.0"), Some(3));
        assert_eq!(parse_integer("3.5"), None);
    }

    #[test]
    fn test_json_merge_overwrites_and_keeps() {
        let existing = Entity::new("citation")
            .with_id(1)
            .with_attr("metadata", json!({"xxx": "yyy", "doi": "old", "isbn": "hello"}));
        let r = row(&[("metadata_doi", "valid_doi1"), ("metadata_blank", ""), ("name", "c1")]);

        let merged = resolve_json_merge(Some(&existing), "metadata", "metadata", &r);
        assert_eq!(
            merged,
            Resolution::Value(json!({"xxx": "yyy", "doi": "valid_doi1", "isbn": "hello"}))
        );
    }

    #[test]
    fn test_json_merge_without_columns() {
        let existing = Entity::new("citation").with_attr("metadata", json!({"a": "1"}));
        let r = row(&[("name", "c1")]);

        assert_eq!(resolve_json_merge(Some(&existing), "metadata", "metadata", &r), Resolution::Absent);
        assert_eq!(resolve_json_merge(None, "metadata", "metadata", &r), Resolution::Value(json!({})));
    }

    #[test]
    fn test_json_merge_reads_text_json() {
        let existing = Entity::new("citation").with_attr("metadata", r#"{"a": "1"}"#);
        let r = row(&[("metadata_b", "2")]);

        assert_eq!(
            resolve_json_merge(Some(&existing), "metadata", "metadata", &r),
            Resolution::Value(json!({"a": "1", "b": "2"}))
        );
    }

    #[test]
    fn test_switcher_uses_present_alternative() {
        let store = SqliteEntityStore::in_memory().unwrap();
        save_author(&store, "Ann", 1, "Ann", "Lee");
        save_author(&store, "Bob", 2, "Bob", "Lee");

        let r = row(&[("author", "Bob")]);
        assert_eq!(resolved_name(resolve(&store, &author_switcher(), &r)), Some("Bob".to_string()));

        let r = row(&[("name", "Dune")]);
        assert_eq!(resolve(&store, &author_switcher(), &r), Resolution::Absent);
    }

    #[test]
    fn test_switcher_first_alternative_wins() {
        let store = SqliteEntityStore::in_memory().unwrap();
        save_author(&store, "Ann", 1, "Ann", "Lee");
        save_author(&store, "Bob", 2, "Bob", "Lee");

        let r = row(&[("author_code", "1"), ("author", "Bob")]);
        assert_eq!(resolved_name(resolve(&store, &author_switcher(), &r)), Some("Ann".to_string()));
    }

    #[test]
    fn test_composite_blank_required_position() {
        let store = SqliteEntityStore::in_memory().unwrap();
        save_author(&store, "Ann", 1, "Ann", "Lee");

        let r = row(&[("author_first", "Ann"), ("author_last", " ")]);
        assert_eq!(resolve(&store, &author_by_full_name(), &r), Resolution::Blank);
    }

    #[test]
    fn test_composite_blank_optional_position() {
        let store = SqliteEntityStore::in_memory().unwrap();
        save_author(&store, "Ann", 1, "Ann", "Lee");
        save_author(&store, "Bob", 2, "Bob", "Park");

        let r = row(&[("author_first", ""), ("author_last", "Park")]);
        assert_eq!(resolved_name(resolve(&store, &author_by_full_name(), &r)), Some("Bob".to_string()));

        let r = row(&[("author_first", "Ann"), ("author_last", "Park")]);
        assert_eq!(
            resolve(&store, &author_by_full_name(), &r),
            Resolution::Invalid("No Author matching '(Ann, Park)'.".to_string())
        );
    }

    #[test]
    fn test_text_is_trimmed() {
        let r = row(&[("name", "  Dune ")]);
        assert_eq!(resolve_scalar(&r, "name", ScalarType::Text), Resolution::Value(json!("Dune")));
    }
}
