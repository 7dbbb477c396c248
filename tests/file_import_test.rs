// ==========================================
// 文件导入 + 配置 集成测试
// ==========================================
// 测试目标: config_kv 设置 → 解析器别名 / 日期端序 → 文件库落地
// ==========================================


use model_import::config::{config_keys, ConfigManager, ImportConfigReader};
use model_import::importer::{ImportEngine, ImportError, ImportOptions};
use model_import::repository::{EntityStore, Filter, SqliteEntityStore};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use test_helpers::*;

fn csv_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".csv").unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

#[test]
fn test_import_csv_with_soft_headings() {
    let (_db_file, db_path) = create_test_db().unwrap();
    let store = SqliteEntityStore::new(&db_path).unwrap();
    insert_author(&store, "Frank");

    let definition = book_definition().soft_heading("name", &["Title", "Book Title"]);
    let engine = ImportEngine::new(definition, &store);
    let csv = csv_file(&["Book Title,Author,Pages", "Dune,Frank,412", ",,", "Emma,Frank,"]);

    let result = engine.import_file(csv.path(), ImportOptions::committed()).unwrap();

    assert_eq!(result.headers(), ["name", "author", "pages"]);
    assert_eq!(result.get_counts(), (2, 0, 0, 0));
    let books = store.query("book", &Filter::all()).unwrap();
    assert_eq!(books[0].get("pages"), Some(&json!(412)));
    assert_eq!(books[1].get("pages"), Some(&serde_json::Value::Null));
}

#[test]
fn test_settings_loaded_from_config() {
    let (_db_file, db_path) = create_test_db().unwrap();
    let config = ConfigManager::new(&db_path).unwrap();
    config.set_value(config_keys::MIDDLE_ENDIAN, "true").unwrap();
    config
        .set_value(config_keys::HEADER_ALIASES, r#"{"Released": "published"}"#)
        .unwrap();
    let settings = config.load_import_settings().unwrap();

    let store = SqliteEntityStore::new(&db_path).unwrap();
    let engine = ImportEngine::new(book_definition(), &store).with_settings(settings);
    let csv = csv_file(&["name,released", "Dune,01/02/03"]);

    let result = engine.import_file(csv.path(), ImportOptions::committed()).unwrap();

    assert_eq!(result.get_counts(), (1, 0, 0, 0));
    let book = store.query("book", &Filter::all()).unwrap().remove(0);
    assert_eq!(book.get("published"), Some(&json!("2003-01-02T00:00:00")));
}

#[test]
fn test_unsupported_file_is_engine_error() {
    let store = SqliteEntityStore::in_memory().unwrap();
    let engine = ImportEngine::new(book_definition(), &store);
    let file = NamedTempFile::with_suffix(".txt").unwrap();

    let result = engine.import_file(file.path(), ImportOptions::committed());
    assert!(matches!(result, Err(ImportError::UnsupportedFormat(_))));
}

#[test]
fn test_available_headers_for_template() {
    let store = SqliteEntityStore::in_memory().unwrap();
    let engine = ImportEngine::new(book_definition(), &store);

    let names: Vec<String> = engine
        .available_headers()
        .into_iter()
        .map(|h| h.name)
        .collect();
    assert_eq!(names, vec!["name", "author", "published", "pages", "metadata_*"]);
}
