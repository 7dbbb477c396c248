// ==========================================
// 表格数据导入引擎 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::settings::ImportSettings;
use std::collections::BTreeMap;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait ImportConfigReader {
    /// 数字日期是否按"月/日/年"解读
    ///
    /// # 默认值
    /// - false（日/月/年）
    fn get_middle_endian(&self) -> anyhow::Result<bool>;

    /// 列名别名表
    ///
    /// # 返回
    /// - BTreeMap<String, String>: 小写别名 → 规范列名
    ///
    /// # 默认值
    /// - 空
    fn get_header_aliases(&self) -> anyhow::Result<BTreeMap<String, String>>;

    /// 一次性读取全部导入设置
    fn load_import_settings(&self) -> anyhow::Result<ImportSettings> {
        Ok(ImportSettings {
            middle_endian: self.get_middle_endian()?,
            header_aliases: self.get_header_aliases()?,
        })
    }
}
