// ==========================================
// 表格数据导入引擎 - 导入层
// ==========================================
// 职责: 表格行 → 校验 → 新建/更新实体，逐行记录结果
// 支持: CSV, Excel (.xlsx)，或调用方直接提供的行
// ==========================================

// 模块声明
pub mod date_parser;
pub mod engine;
pub mod error;
pub mod field_messages;
pub mod field_resolver;
pub mod file_parser;
pub mod resolution_cache;
pub mod result_set;
pub mod row_processor;
pub mod row_validator;
pub mod schema_builder;

// 重导出核心类型
pub use date_parser::{DateParser, ParsedDateTime, DATETIME_FORMAT};
pub use engine::{ImportEngine, ImportOptions};
pub use error::{ImportError, ImportResult};
pub use field_messages::FieldMessages;
pub use field_resolver::Resolution;
pub use file_parser::{CsvParser, ExcelParser, HeaderNormalizer, ParsedTable, TabularParser, UniversalFileParser};
pub use resolution_cache::{FieldResolutionCache, Lookup, UpdateCache};
pub use result_set::{ImportCounts, ImportResultSet, RowOutcome};
pub use row_processor::{RowDecision, RowPolicy, RowProcessor, ROW_ERROR_KEY};
pub use row_validator::{RowValidator, ValidatedRow};
pub use schema_builder::SchemaBuilder;
