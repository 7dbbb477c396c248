// ==========================================
// 表格数据导入引擎 - 单行处理状态机
// ==========================================
// 判定顺序（先命中者生效）:
// 1. 跳过谓词为真 → 跳过（只计数，不产生结果）
// 2. id 为空 → 允许新建则新建，否则拒绝
// 3. id 非空 → 允许更新则更新，否则拒绝
// 新建/更新在独立保存点内执行，失败只回滚本行
// ==========================================

use crate::domain::entity::{Entity, EntityId, Row, ID_COLUMN};
use crate::domain::schema::{ImportSchema, ImporterDefinition};
use crate::i18n::{t, t_with_args};
use crate::importer::field_messages::FieldMessages;
use crate::importer::resolution_cache::{FieldResolutionCache, UpdateCache};
use crate::importer::result_set::{ImportCounts, RowOutcome};
use crate::importer::row_validator::{RowValidator, ValidatedRow};
use crate::repository::entity_store::EntityStore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::transaction::TransactionScope;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// 行保存失败使用的字段键（非某个具体字段）
pub const ROW_ERROR_KEY: &str = "__all__";

/// 单行判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDecision {
    Skip,
    Create,
    Update,
    RejectInsert,
    RejectUpdate,
}

/// 新建/更新许可与导入人
#[derive(Debug, Clone, Copy)]
pub struct RowPolicy {
    pub allow_insert: bool,
    pub allow_update: bool,
    pub author: Option<EntityId>,
}

impl Default for RowPolicy {
    fn default() -> Self {
        Self {
            allow_insert: true,
            allow_update: true,
            author: None,
        }
    }
}

// ==========================================
// RowProcessor
// ==========================================
pub struct RowProcessor<'p, S: EntityStore + ?Sized> {
    store: &'p S,
    definition: &'p ImporterDefinition,
    validator: RowValidator<'p, S>,
    update_schema: &'p ImportSchema,
    create_schema: &'p ImportSchema,
    update_cache: Option<UpdateCache>,
    skip_predicate: Option<&'p dyn Fn(&Row) -> bool>,
    policy: RowPolicy,
    counts: ImportCounts,
}

impl<'p, S: EntityStore + ?Sized> RowProcessor<'p, S> {
    /// # 参数
    /// - update_cache: 限定可更新范围时的预加载实体（None = 按 id 直接查询），
    ///   每次更新保存后刷新为最新状态
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'p S,
        definition: &'p ImporterDefinition,
        validator: RowValidator<'p, S>,
        update_schema: &'p ImportSchema,
        create_schema: &'p ImportSchema,
        update_cache: Option<UpdateCache>,
        skip_predicate: Option<&'p dyn Fn(&Row) -> bool>,
        policy: RowPolicy,
    ) -> Self {
        Self {
            store,
            definition,
            validator,
            update_schema,
            create_schema,
            update_cache,
            skip_predicate,
            policy,
            counts: ImportCounts::default(),
        }
    }

    pub fn counts(&self) -> ImportCounts {
        self.counts
    }

    /// 判定一行的处理方式
    pub fn classify(&self, row: &Row) -> RowDecision {
        if self.skip_predicate.map(|skip| skip(row)).unwrap_or(false) {
            return RowDecision::Skip;
        }

        match raw_id(row) {
            None if self.policy.allow_insert => RowDecision::Create,
            None => RowDecision::RejectInsert,
            Some(_) if self.policy.allow_update => RowDecision::Update,
            Some(_) => RowDecision::RejectUpdate,
        }
    }

    /// 处理一行
    ///
    /// # 返回
    /// - Ok(None): 跳过的行
    /// - Ok(Some(outcome)): 新建/更新/拒绝/失败的行
    /// - Err: 保存点本身的异常（中止整个导入）
    pub fn process(
        &mut self,
        cache: &mut FieldResolutionCache,
        line_number: usize,
        row: &Row,
    ) -> RepositoryResult<Option<RowOutcome>> {
        let decision = self.classify(row);
        debug!(line = line_number, ?decision, "行判定");

        let outcome = match decision {
            RowDecision::Skip => {
                self.counts.skipped += 1;
                return Ok(None);
            }
            RowDecision::RejectInsert => {
                self.rejected(line_number, row, true, t("import.insert_not_permitted"))
            }
            RowDecision::RejectUpdate => {
                self.rejected(line_number, row, false, t("import.update_not_permitted"))
            }
            RowDecision::Create | RowDecision::Update => {
                self.import_row(cache, line_number, row, decision == RowDecision::Create)?
            }
        };

        match (outcome.is_valid(), outcome.created) {
            (true, true) => self.counts.created += 1,
            (true, false) => self.counts.updated += 1,
            (false, _) => self.counts.failed += 1,
        }
        Ok(Some(outcome))
    }

    fn rejected(&self, line_number: usize, row: &Row, created: bool, message: String) -> RowOutcome {
        let mut outcome = empty_outcome(line_number, row, created);
        outcome.errors.add(ID_COLUMN, message);
        outcome
    }

    /// 新建/更新: 保存点内 校验 → 保存，任何失败只回滚本行
    fn import_row(
        &mut self,
        cache: &mut FieldResolutionCache,
        line_number: usize,
        row: &Row,
        created: bool,
    ) -> RepositoryResult<RowOutcome> {
        let scope = TransactionScope::open(self.store, "import_row")?;

        match self.attempt(cache, line_number, row, created) {
            Ok(outcome) if outcome.is_valid() => {
                scope.commit()?;
                if let (Some(update_cache), Some(saved)) = (self.update_cache.as_mut(), &outcome.instance) {
                    update_cache.replace(saved.clone());
                }
                Ok(outcome)
            }
            Ok(outcome) => {
                scope.rollback()?;
                Ok(outcome)
            }
            Err(e) => {
                warn!(line = line_number, error = %e, "行保存失败，已回滚");
                scope.rollback()?;
                let mut outcome = empty_outcome(line_number, row, created);
                let line = line_number.to_string();
                let error = e.to_string();
                outcome.errors.add(
                    ROW_ERROR_KEY,
                    t_with_args(
                        "import.row_save_failed",
                        &[("line", line.as_str()), ("error", error.as_str())],
                    ),
                );
                Ok(outcome)
            }
        }
    }

    fn attempt(
        &self,
        cache: &mut FieldResolutionCache,
        line_number: usize,
        row: &Row,
        created: bool,
    ) -> RepositoryResult<RowOutcome> {
        // === 步骤 1: 定位已有实体（更新） ===
        let existing = if created {
            None
        } else {
            match self.load_for_update(row)? {
                Ok(entity) => Some(entity),
                Err(message) => {
                    let mut outcome = empty_outcome(line_number, row, created);
                    outcome.errors.add(ID_COLUMN, message);
                    return Ok(outcome);
                }
            }
        };

        // === 步骤 2: 校验 ===
        let schema = if created {
            self.create_schema
        } else {
            self.update_schema
        };
        let ValidatedRow {
            entity,
            related,
            virtual_values,
            errors,
            warnings,
        } = self
            .validator
            .validate(cache, row, schema, existing.as_ref(), self.policy.author)?;

        if !errors.is_empty() {
            return Ok(RowOutcome {
                line_number,
                row: row.clone(),
                errors,
                warnings,
                instance: None,
                related,
                virtual_values,
                created,
            });
        }

        // === 步骤 3: 保存 ===
        let saved = self.store.save(&entity)?;
        debug!(line = line_number, id = ?saved.id, created, "行已保存");

        Ok(RowOutcome {
            line_number,
            row: row.clone(),
            errors,
            warnings,
            instance: Some(saved),
            related,
            virtual_values,
            created,
        })
    }

    /// 定位待更新实体
    ///
    /// # 返回
    /// - Ok(Ok(entity)): 找到
    /// - Ok(Err(message)): 不存在或不在可更新范围内（行错误）
    fn load_for_update(&self, row: &Row) -> RepositoryResult<Result<Entity, String>> {
        let raw = raw_id(row).unwrap_or_default();
        let entity_name = self.definition.entity.display_name();
        let message = |key: &str| {
            t_with_args(key, &[("entity", entity_name.as_str()), ("id", raw)])
        };

        if let Some(update_cache) = &self.update_cache {
            return Ok(update_cache
                .get(raw)
                .cloned()
                .ok_or_else(|| message("import.cannot_be_updated")));
        }

        let Ok(id) = raw.parse::<EntityId>() else {
            return Ok(Err(message("import.cannot_be_updated")));
        };

        match self.store.get_by_id(&self.definition.entity.name, id) {
            Ok(entity) => Ok(Ok(entity)),
            Err(RepositoryError::NotFound { .. }) => Ok(Err(message("import.does_not_exist"))),
            Err(e) => Err(e),
        }
    }
}

/// 非空白的 id 单元格
fn raw_id(row: &Row) -> Option<&str> {
    row.get(ID_COLUMN)
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
}

fn empty_outcome(line_number: usize, row: &Row, created: bool) -> RowOutcome {
    RowOutcome {
        line_number,
        row: row.clone(),
        errors: FieldMessages::new(),
        warnings: FieldMessages::new(),
        instance: None,
        related: BTreeMap::new(),
        virtual_values: BTreeMap::new(),
        created,
    }
}
