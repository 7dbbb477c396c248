// ==========================================
// 表格数据导入引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 定位: 表格行 → 实体的新建/更新，逐行校验，预览与提交共用同一路径
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "en");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体元数据与导入字段声明
pub mod domain;

// 数据仓储层 - 实体存取与保存点
pub mod repository;

// 导入层 - 解析、校验、逐行处理
pub mod importer;

// 配置层 - 导入设置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// ==========================================
// 重导出核心类型
// ==========================================

pub use config::{ConfigManager, ImportConfigReader, ImportSettings};
pub use domain::{
    AttributeKind, AttributeSpec, Entity, EntityId, EntityMeta, FieldSpec, FlatColumn,
    ImportHeader, ImportSchema, ImporterDefinition, ResolutionKind, Row, ScalarType,
};
pub use importer::{
    ImportCounts, ImportEngine, ImportError, ImportOptions, ImportResult, ImportResultSet,
    RowOutcome,
};
pub use repository::{EntityStore, Filter, RepositoryError, SqliteEntityStore};

// ==========================================
// 常量定义
// ==========================================

// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
