// ==========================================
// 表格数据导入引擎 - 导入主流程
// ==========================================
// 流程: 校验声明 → 打开外层事务 → 预加载可更新范围 → 构建字段集
//       → 打开内层事务 → 逐行处理 → 提交/回滚内层 → 提交外层
//       → 设置计数 → （提交模式）执行收尾回调
// 约束: 预览模式与提交模式走完全相同的路径，仅内层事务结局不同
// ==========================================

use crate::config::settings::ImportSettings;
use crate::domain::entity::{EntityId, Row};
use crate::domain::schema::{ImportHeader, ImporterDefinition};
use crate::importer::date_parser::DateParser;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::resolution_cache::{FieldResolutionCache, UpdateCache};
use crate::importer::result_set::{ImportResultSet, RowOutcome};
use crate::importer::row_processor::{RowPolicy, RowProcessor};
use crate::importer::row_validator::RowValidator;
use crate::importer::schema_builder::SchemaBuilder;
use crate::repository::entity_store::{EntityStore, Filter};
use crate::repository::transaction::TransactionScope;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, info_span};
use uuid::Uuid;

type ProgressCallback<'a> = Box<dyn FnMut(&RowOutcome) + 'a>;
type SkipPredicate<'a> = Box<dyn Fn(&Row) -> bool + 'a>;
type PostCollectionHook<'a> = Box<dyn FnOnce(&ImportResultSet) + 'a>;

// ==========================================
// ImportOptions - 单次导入选项
// ==========================================
pub struct ImportOptions<'a> {
    /// false = 预览（全部写入最终回滚），默认预览
    pub commit: bool,
    pub allow_update: bool,
    pub allow_insert: bool,
    /// 限定可更新范围（None = 不限）
    pub limit_to_queryset: Option<Filter>,
    pub author: Option<EntityId>,
    pub progress_callback: Option<ProgressCallback<'a>>,
    pub skip_predicate: Option<SkipPredicate<'a>>,
    pub post_collection_hook: Option<PostCollectionHook<'a>>,
}

impl Default for ImportOptions<'_> {
    fn default() -> Self {
        Self {
            commit: false,
            allow_update: true,
            allow_insert: true,
            limit_to_queryset: None,
            author: None,
            progress_callback: None,
            skip_predicate: None,
            post_collection_hook: None,
        }
    }
}

impl<'a> ImportOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预览模式（同 new）
    pub fn preview() -> Self {
        Self::default()
    }

    /// 提交模式
    pub fn committed() -> Self {
        Self::default().commit(true)
    }

    pub fn commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    pub fn allow_update(mut self, allow: bool) -> Self {
        self.allow_update = allow;
        self
    }

    pub fn allow_insert(mut self, allow: bool) -> Self {
        self.allow_insert = allow;
        self
    }

    pub fn limit_to(mut self, filter: Filter) -> Self {
        self.limit_to_queryset = Some(filter);
        self
    }

    pub fn author(mut self, author: EntityId) -> Self {
        self.author = Some(author);
        self
    }

    pub fn on_progress(mut self, callback: impl FnMut(&RowOutcome) + 'a) -> Self {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn skip_when(mut self, predicate: impl Fn(&Row) -> bool + 'a) -> Self {
        self.skip_predicate = Some(Box::new(predicate));
        self
    }

    pub fn after_commit(mut self, hook: impl FnOnce(&ImportResultSet) + 'a) -> Self {
        self.post_collection_hook = Some(Box::new(hook));
        self
    }

    fn policy(&self) -> RowPolicy {
        RowPolicy {
            allow_insert: self.allow_insert,
            allow_update: self.allow_update,
            author: self.author,
        }
    }
}

// ==========================================
// ImportEngine
// ==========================================
pub struct ImportEngine<'s, S: EntityStore + ?Sized> {
    definition: ImporterDefinition,
    store: &'s S,
    settings: ImportSettings,
}

impl<'s, S: EntityStore + ?Sized> ImportEngine<'s, S> {
    pub fn new(definition: ImporterDefinition, store: &'s S) -> Self {
        Self {
            definition,
            store,
            settings: ImportSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ImportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn definition(&self) -> &ImporterDefinition {
        &self.definition
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// 可导入列（用于生成模板 / 帮助）
    pub fn available_headers(&self) -> Vec<ImportHeader> {
        self.definition.available_headers()
    }

    /// 解析器使用的列名别名（声明的 soft headings + 配置）
    pub fn header_aliases(&self) -> BTreeMap<String, String> {
        self.settings.merged_aliases(self.definition.header_aliases())
    }

    /// 执行一次导入
    ///
    /// # 参数
    /// - headers: 规范化后的列名
    /// - rows: 数据行（行号从 1 开始，跳过的行不计）
    /// - options: 提交/预览、许可、回调
    ///
    /// # 返回
    /// - Ok(ImportResultSet): 每行结果与计数（行级失败在结果中）
    /// - Err: 声明无效或存储层事务异常（此时全部写入回滚）
    pub fn process(
        &self,
        headers: &[String],
        rows: &[Row],
        mut options: ImportOptions<'_>,
    ) -> ImportResult<ImportResultSet> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("import_run", run_id = %run_id, entity = %self.definition.entity.name);
        let _guard = span.enter();

        let builder = SchemaBuilder::new(&self.definition);
        builder.validate_definition()?;

        info!(
            rows = rows.len(),
            commit = options.commit,
            allow_insert = options.allow_insert,
            allow_update = options.allow_update,
            "开始导入"
        );

        // === 步骤 1: 外层事务 ===
        let outer = TransactionScope::open(self.store, "import_run")?;

        // === 步骤 2: 预加载可更新范围 ===
        let update_cache = match (&options.limit_to_queryset, options.allow_update) {
            (Some(filter), true) => {
                let cache = UpdateCache::preload(self.store, &self.definition.entity.name, filter)?;
                debug!(filter = %filter, preloaded = cache.len(), "可更新范围已预加载");
                Some(cache)
            }
            _ => None,
        };

        // === 步骤 3: 字段集 ===
        let (update_schema, create_schema) = builder.build(headers);
        let mut result_set = ImportResultSet::new(headers.to_vec(), create_schema.clone());

        // === 步骤 4: 逐行处理 ===
        let inner = TransactionScope::open(self.store, "import_rows")?;
        let mut cache = FieldResolutionCache::new();
        let validator = RowValidator::new(
            self.store,
            &self.definition,
            DateParser::new(self.settings.middle_endian),
        );
        let skip_predicate = options
            .skip_predicate
            .as_deref()
            .map(|predicate| predicate as &dyn Fn(&Row) -> bool);
        let mut processor = RowProcessor::new(
            self.store,
            &self.definition,
            validator,
            &update_schema,
            &create_schema,
            update_cache,
            skip_predicate,
            options.policy(),
        );

        for row in rows {
            // 跳过的行不占行号
            let line_number = result_set.get_results().len() + 1;
            if let Some(outcome) = processor.process(&mut cache, line_number, row)? {
                let outcome = result_set.append(outcome);
                if let Some(callback) = options.progress_callback.as_mut() {
                    callback(outcome);
                }
            }
        }
        let counts = processor.counts();

        // === 步骤 5: 结束事务 ===
        if options.commit {
            inner.commit()?;
        } else {
            inner.rollback()?;
        }
        outer.commit()?;

        result_set.set_counts(counts);
        info!(
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            failed = counts.failed,
            lookups = cache.query_count(),
            committed = options.commit,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "导入完成"
        );

        // === 步骤 6: 收尾回调（仅提交模式） ===
        if options.commit {
            if let Some(hook) = options.post_collection_hook.take() {
                hook(&result_set);
            }
        }

        Ok(result_set)
    }

    /// 解析文件并导入
    pub fn import_file<P: AsRef<Path>>(
        &self,
        path: P,
        options: ImportOptions<'_>,
    ) -> ImportResult<ImportResultSet> {
        let table = UniversalFileParser::with_aliases(self.header_aliases()).parse(path)?;
        self.process(&table.headers, &table.rows, options)
    }
}
