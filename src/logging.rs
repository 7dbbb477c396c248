// ==========================================
// 表格数据导入引擎 - 日志初始化
// ==========================================
// 输出: 文本（交互使用）/ JSON（批量导入落盘）
// 过滤: RUST_LOG，未设置时按各入口的默认指令
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 默认只输出本库的 info 及以上
const DEFAULT_DIRECTIVE: &str = "model_import=info";

fn env_or(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// 文本日志
///
/// # 环境变量
/// - RUST_LOG: 例如 RUST_LOG=model_import::importer=debug
///
/// # 示例
/// ```no_run
/// use model_import::logging;
/// logging::init();
/// ```
pub fn init() {
    fmt()
        .with_env_filter(env_or(DEFAULT_DIRECTIVE))
        .with_target(true)
        .with_line_number(true)
        .init();
}

/// JSON 日志，每条事件带上当前 import_run span 的 run_id / entity
pub fn init_json() {
    fmt()
        .json()
        .with_env_filter(env_or(DEFAULT_DIRECTIVE))
        .with_current_span(true)
        .with_span_list(false)
        .init();
}

/// 测试用: debug 级别写入测试输出，重复调用无副作用
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(env_or("model_import=debug"))
        .with_test_writer()
        .try_init();
}
