// ==========================================
// 表格数据导入引擎 - 领域模型层
// ==========================================
// 职责: 定义实体元数据、动态实体、导入字段声明
// 红线: 不含数据访问逻辑,不含导入流程逻辑
// ==========================================

pub mod entity;
pub mod schema;

// 重导出核心类型
pub use entity::{AttributeKind, AttributeSpec, Entity, EntityId, EntityMeta, Row, ID_COLUMN};
pub use schema::{
    FieldSpec, FlatColumn, ImportHeader, ImportSchema, ImporterDefinition, ReferenceColumn,
    ResolutionKind, ScalarType,
};
