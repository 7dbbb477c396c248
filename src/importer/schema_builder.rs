// ==========================================
// 表格数据导入引擎 - 导入字段集合构建
// ==========================================
// 职责: 声明字段 + 实际列名 → (更新字段集, 新建字段集)
// 规则:
// - 以前缀为来源的字段（扁平嵌套/JSON 合并）与虚拟字段总是参与
// - 其它字段: 任一列组 ⊆ 实际列名即参与（多组时取声明顺序最早者）
// - 组合引用: 任一必需位置的列出现即参与
// - 新建字段集 = 参与字段 ∪ 实体必填属性
// ==========================================

use crate::domain::entity::{AttributeKind, AttributeSpec};
use crate::domain::schema::{FieldSpec, ImportSchema, ImporterDefinition, ResolutionKind, ScalarType};
use crate::importer::error::{ImportError, ImportResult};
use std::collections::HashSet;
use tracing::debug;

pub struct SchemaBuilder<'d> {
    definition: &'d ImporterDefinition,
}

impl<'d> SchemaBuilder<'d> {
    pub fn new(definition: &'d ImporterDefinition) -> Self {
        Self { definition }
    }

    /// 检查导入器声明本身是否自洽
    pub fn validate_definition(&self) -> ImportResult<()> {
        let mut seen = HashSet::new();
        for field in &self.definition.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ImportError::DuplicateField(field.name.clone()));
            }
            validate_field(field)?;
        }

        for name in &self.definition.virtual_fields {
            if !seen.contains(name.as_str()) {
                return Err(ImportError::UnknownField(name.clone()));
            }
        }

        if let Some(author) = &self.definition.author_field {
            if self.definition.entity.get_attribute(author).is_none() {
                return Err(ImportError::UnknownField(author.clone()));
            }
        }
        Ok(())
    }

    /// 构建 (更新字段集, 新建字段集)
    pub fn build(&self, headers: &[String]) -> (ImportSchema, ImportSchema) {
        let header_set: HashSet<&str> = headers.iter().map(String::as_str).collect();
        let entity = &self.definition.entity;

        let mut update = ImportSchema::default();
        let mut create = ImportSchema::default();

        for field in &self.definition.fields {
            let present = self.is_present(field, &header_set);
            let entity_required = entity
                .get_attribute(&field.name)
                .map(AttributeSpec::is_required)
                .unwrap_or(false)
                && !self.is_author_field(&field.name);

            if present {
                update.fields.push(self.effective(field));
            }
            if present || entity_required {
                create.fields.push(self.effective(field));
            }
        }

        for attr in entity.required_attributes() {
            if self.definition.get_field(&attr.name).is_some() || self.is_author_field(&attr.name) {
                continue;
            }
            create.fields.push(synthesize_field(attr));
        }

        debug!(
            entity = %entity.name,
            update_fields = ?update.field_names(),
            create_fields = ?create.field_names(),
            "导入字段集已构建"
        );
        (update, create)
    }

    fn is_present(&self, field: &FieldSpec, headers: &HashSet<&str>) -> bool {
        if self.definition.is_virtual(&field.name) || field.is_prefix_sourced() {
            return true;
        }

        if let ResolutionKind::CompositeReference {
            columns,
            required_positions,
            ..
        } = &field.kind
        {
            let positions: Vec<usize> = if required_positions.is_empty() {
                (0..columns.len()).collect()
            } else {
                required_positions.clone()
            };
            if positions
                .iter()
                .filter_map(|idx| columns.get(*idx))
                .any(|c| headers.contains(c.header.as_str()))
            {
                return true;
            }
        }

        field
            .header_groups()
            .iter()
            .any(|group| !group.is_empty() && group.iter().all(|h| headers.contains(h.as_str())))
    }

    /// 字段的实际必填标记 = 声明必填 或 同名实体属性必填
    fn effective(&self, field: &FieldSpec) -> FieldSpec {
        let mut spec = field.clone();
        let entity_required = self
            .definition
            .entity
            .get_attribute(&field.name)
            .map(AttributeSpec::is_required)
            .unwrap_or(false);
        if entity_required && !self.is_author_field(&field.name) {
            spec.required = true;
        }
        spec
    }

    fn is_author_field(&self, name: &str) -> bool {
        self.definition.author_field.as_deref() == Some(name)
    }
}

fn validate_field(field: &FieldSpec) -> ImportResult<()> {
    let invalid = |message: &str| ImportError::InvalidFieldSpec {
        field: field.name.clone(),
        message: message.to_string(),
    };

    match &field.kind {
        ResolutionKind::CachedReference { columns, .. } if columns.is_empty() => {
            Err(invalid("引用字段至少需要一列"))
        }
        ResolutionKind::CompositeReference {
            columns,
            required_positions,
            ..
        } => {
            if columns.is_empty() {
                return Err(invalid("组合引用至少需要一列"));
            }
            if required_positions.iter().any(|idx| *idx >= columns.len()) {
                return Err(invalid("必需位置超出列范围"));
            }
            Ok(())
        }
        ResolutionKind::FlatNestedObject { columns, .. } if columns.is_empty() => {
            Err(invalid("嵌套对象至少需要一列"))
        }
        ResolutionKind::Switcher { alternatives } => {
            if alternatives.is_empty() {
                return Err(invalid("备选来源不能为空"));
            }
            alternatives.iter().try_for_each(validate_field)
        }
        _ => Ok(()),
    }
}

/// 为没有声明字段的必填属性合成标量字段（列名 = 属性名）
fn synthesize_field(attr: &AttributeSpec) -> FieldSpec {
    let spec = match attr.kind {
        AttributeKind::Text => FieldSpec::text(&attr.name),
        AttributeKind::Integer | AttributeKind::Reference => {
            FieldSpec::scalar(&attr.name, &attr.name, ScalarType::Integer)
        }
        AttributeKind::Float => FieldSpec::float(&attr.name),
        AttributeKind::Boolean => FieldSpec::boolean(&attr.name),
        AttributeKind::DateTime => FieldSpec::datetime(&attr.name),
        AttributeKind::Json => FieldSpec::json_merge(&attr.name),
    };
    spec.required()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::EntityMeta;
    use crate::domain::schema::FlatColumn;

    fn author_meta() -> EntityMeta {
        EntityMeta::new("author").attribute(AttributeSpec::new("name", AttributeKind::Text))
    }

    fn book_definition() -> ImporterDefinition {
        let book = EntityMeta::new("book")
            .attribute(AttributeSpec::new("name", AttributeKind::Text))
            .attribute(AttributeSpec::new("author", AttributeKind::Reference))
            .attribute(AttributeSpec::new("isbn", AttributeKind::Text))
            .attribute(AttributeSpec::new("notes", AttributeKind::Text).nullable());

        ImporterDefinition::new(book)
            .field(FieldSpec::text("name"))
            .field(FieldSpec::reference("author", author_meta(), &[("author", "name")]))
            .field(FieldSpec::text("notes"))
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_update_schema_only_present_fields() {
        let def = book_definition();
        let (update, create) = SchemaBuilder::new(&def).build(&headers(&["id", "name"]));

        assert_eq!(update.field_names(), vec!["name"]);
        assert_eq!(create.field_names(), vec!["name", "author", "isbn"]);
        assert!(update.get("name").unwrap().required);
        assert!(create.get("author").unwrap().required);
        // isbn 无声明字段，按属性合成
        assert!(matches!(
            create.get("isbn").unwrap().kind,
            ResolutionKind::Scalar { ref header, scalar: ScalarType::Text } if header == "isbn"
        ));
    }

    #[test]
    fn test_empty_headers_yield_required_only() {
        let def = book_definition();
        let (update, create) = SchemaBuilder::new(&def).build(&[]);

        assert!(update.is_empty());
        assert_eq!(create.field_names(), vec!["name", "author", "isbn"]);
    }

    #[test]
    fn test_prefix_sourced_fields_always_present() {
        let def = ImporterDefinition::new(EntityMeta::new("book"))
            .field(FieldSpec::json_merge("metadata"))
            .field(FieldSpec::flat_nested(
                "author",
                author_meta(),
                vec![FlatColumn::new("author_name", "name")],
            ));

        let (update, _) = SchemaBuilder::new(&def).build(&headers(&["name"]));
        assert_eq!(update.field_names(), vec!["metadata", "author"]);
    }

    #[test]
    fn test_composite_partial_tolerance() {
        let def = ImporterDefinition::new(EntityMeta::new("book")).field(
            FieldSpec::composite_reference(
                "author",
                author_meta(),
                &[("first_name", "first_name"), ("last_name", "last_name")],
                &[1],
            ),
        );
        let builder = SchemaBuilder::new(&def);

        assert!(builder.build(&headers(&["last_name"])).0.contains("author"));
        assert!(!builder.build(&headers(&["first_name"])).0.contains("author"));
    }

    #[test]
    fn test_switcher_present_when_any_group_present() {
        let def = ImporterDefinition::new(EntityMeta::new("book")).field(FieldSpec::switcher(
            "author",
            vec![
                FieldSpec::reference("by_name", author_meta(), &[("author", "name")]),
                FieldSpec::reference("by_code", author_meta(), &[("author_code", "code")]),
            ],
        ));
        let builder = SchemaBuilder::new(&def);

        assert!(builder.build(&headers(&["author_code"])).0.contains("author"));
        assert!(!builder.build(&headers(&["name"])).0.contains("author"));
    }

    #[test]
    fn test_virtual_fields_always_present() {
        let def = ImporterDefinition::new(EntityMeta::new("book"))
            .virtual_field(FieldSpec::text("batch_label"));
        let (update, _) = SchemaBuilder::new(&def).build(&[]);
        assert_eq!(update.field_names(), vec!["batch_label"]);
    }

    #[test]
    fn test_author_field_not_synthesized() {
        let book = EntityMeta::new("book")
            .attribute(AttributeSpec::new("name", AttributeKind::Text))
            .attribute(AttributeSpec::new("created_by", AttributeKind::Reference));
        let def = ImporterDefinition::new(book)
            .field(FieldSpec::text("name"))
            .author_field("created_by");

        let (_, create) = SchemaBuilder::new(&def).build(&headers(&["name"]));
        assert_eq!(create.field_names(), vec!["name"]);
    }

    #[test]
    fn test_definition_validation() {
        let dup = ImporterDefinition::new(EntityMeta::new("book"))
            .field(FieldSpec::text("name"))
            .field(FieldSpec::text("name"));
        assert!(matches!(
            SchemaBuilder::new(&dup).validate_definition(),
            Err(ImportError::DuplicateField(name)) if name == "name"
        ));

        let bad_author = ImporterDefinition::new(EntityMeta::new("book")).author_field("nobody");
        assert!(matches!(
            SchemaBuilder::new(&bad_author).validate_definition(),
            Err(ImportError::UnknownField(_))
        ));

        let bad_switcher =
            ImporterDefinition::new(EntityMeta::new("book")).field(FieldSpec::switcher("x", vec![]));
        assert!(matches!(
            SchemaBuilder::new(&bad_switcher).validate_definition(),
            Err(ImportError::InvalidFieldSpec { .. })
        ));

        assert!(SchemaBuilder::new(&book_definition()).validate_definition().is_ok());
    }
}
