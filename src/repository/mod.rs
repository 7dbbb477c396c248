// ==========================================
// 表格数据导入引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供实体存取与保存点接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod entity_store;
pub mod error;
pub mod sqlite_store;
pub mod transaction;

// 重导出核心仓储
pub use entity_store::{EntityStore, Filter};
pub use error::{RepositoryError, RepositoryResult};
pub use sqlite_store::SqliteEntityStore;
pub use transaction::TransactionScope;
