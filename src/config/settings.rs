// ==========================================
// 表格数据导入引擎 - 导入运行设置
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 导入运行设置（由 ConfigManager 从 config_kv 加载，或由调用方直接构造）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSettings {
    /// 数字日期按"月/日/年"解读（默认"日/月/年"）
    pub middle_endian: bool,
    /// 列名别名（小写别名 → 规范列名），与导入器声明的 soft headings 合并
    pub header_aliases: BTreeMap<String, String>,
}

impl ImportSettings {
    pub fn with_middle_endian(mut self, middle_endian: bool) -> Self {
        self.middle_endian = middle_endian;
        self
    }

    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.header_aliases
            .insert(alias.trim().to_lowercase(), canonical.to_string());
        self
    }

    /// 合并别名；已存在的键以本设置为准
    pub fn merged_aliases(&self, declared: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = declared;
        for (alias, canonical) in &self.header_aliases {
            merged.insert(alias.clone(), canonical.clone());
        }
        merged
    }
}
