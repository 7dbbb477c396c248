// ==========================================
// 表格数据导入引擎 - 表格解析器
// ==========================================
// 支持: CSV (.csv) / Excel (.xlsx，第一个工作表)
// 列名规范化: 去空白 → 小写 → 别名映射（不区分大小写）
// 约束: 完全空白的行被丢弃；短行缺失的单元格补空串
// ==========================================

use crate::domain::entity::Row;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{Reader, Xlsx};
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// 解析结果: 规范化后的列名 + 按输入顺序的数据行
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl ParsedTable {
    fn from_cells(normalizer: &HeaderNormalizer, raw_headers: Vec<String>, cells: Vec<Vec<String>>) -> Self {
        let headers: Vec<String> = raw_headers.iter().map(|h| normalizer.normalize(h)).collect();

        let rows = cells
            .into_iter()
            .filter(|record| record.iter().any(|v| !v.trim().is_empty()))
            .map(|record| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(idx, header)| {
                        let value = record.get(idx).map(|v| v.trim().to_string()).unwrap_or_default();
                        (header.clone(), value)
                    })
                    .collect()
            })
            .collect();

        Self { headers, rows }
    }
}

// ==========================================
// TabularParser Trait
// ==========================================
pub trait TabularParser {
    /// 解析原始字节
    fn parse(&self, raw: &[u8]) -> ImportResult<ParsedTable>;

    /// 可接受的扩展名（小写，不含点）
    fn extensions(&self) -> &'static [&'static str];

    /// 解析文件
    fn parse_file(&self, path: &Path) -> ImportResult<ParsedTable> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let ext = extension_of(path);
        if !self.extensions().contains(&ext.as_str()) {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let raw = std::fs::read(path)?;
        let table = self.parse(&raw)?;
        debug!(
            path = %path.display(),
            headers = table.headers.len(),
            rows = table.rows.len(),
            "文件解析完成"
        );
        Ok(table)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

// ==========================================
// HeaderNormalizer - 列名规范化
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct HeaderNormalizer {
    /// 小写别名 → 规范列名
    aliases: BTreeMap<String, String>,
}

impl HeaderNormalizer {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        let aliases = aliases
            .into_iter()
            .map(|(alias, canonical)| (alias.trim().to_lowercase(), canonical))
            .collect();
        Self { aliases }
    }

    pub fn normalize(&self, header: &str) -> String {
        let lowered = header.trim().to_lowercase();
        match self.aliases.get(&lowered) {
            Some(canonical) => canonical.clone(),
            None => lowered,
        }
    }
}

// ==========================================
// CSV Parser 实现
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CsvParser {
    normalizer: HeaderNormalizer,
}

impl CsvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aliases(aliases: BTreeMap<String, String>) -> Self {
        Self {
            normalizer: HeaderNormalizer::new(aliases),
        }
    }

    /// 从内存文本解析
    pub fn parse_str(&self, text: &str) -> ImportResult<ParsedTable> {
        self.parse(text.as_bytes())
    }
}

impl TabularParser for CsvParser {
    fn parse(&self, raw: &[u8]) -> ImportResult<ParsedTable> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(raw);

        let raw_headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut cells = Vec::new();
        for result in reader.records() {
            let record = result?;
            cells.push(record.iter().map(str::to_string).collect());
        }

        Ok(ParsedTable::from_cells(&self.normalizer, raw_headers, cells))
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv"]
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ExcelParser {
    normalizer: HeaderNormalizer,
}

impl ExcelParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aliases(aliases: BTreeMap<String, String>) -> Self {
        Self {
            normalizer: HeaderNormalizer::new(aliases),
        }
    }
}

impl TabularParser for ExcelParser {
    fn parse(&self, raw: &[u8]) -> ImportResult<ParsedTable> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(raw.to_vec()))?;

        let sheet_names = workbook.sheet_names();
        let Some(sheet_name) = sheet_names.first().cloned() else {
            return Err(ImportError::ExcelParseError("Excel 文件无工作表".to_string()));
        };
        let range = workbook.worksheet_range(&sheet_name)?;

        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            return Ok(ParsedTable::default());
        };
        let raw_headers: Vec<String> = header_row.iter().map(|cell| cell.to_string()).collect();
        let cells: Vec<Vec<String>> = rows
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();

        Ok(ParsedTable::from_cells(&self.normalizer, raw_headers, cells))
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xlsx"]
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct UniversalFileParser {
    aliases: BTreeMap<String, String>,
}

impl UniversalFileParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aliases(aliases: BTreeMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn parse<P: AsRef<Path>>(&self, file_path: P) -> ImportResult<ParsedTable> {
        let path = file_path.as_ref();
        match extension_of(path).as_str() {
            "csv" => CsvParser::with_aliases(self.aliases.clone()).parse_file(path),
            "xlsx" => ExcelParser::with_aliases(self.aliases.clone()).parse_file(path),
            other => Err(ImportError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_csv_headers_normalized() {
        let parser = CsvParser::with_aliases(BTreeMap::from([(
            "Book Title".to_string(),
            "name".to_string(),
        )]));
        let table = parser
            .parse_str(" ID ,book title,Author\n1,Dune,Frank\n")
            .unwrap();

        assert_eq!(table.headers, vec!["id", "name", "author"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("name"), Some(&"Dune".to_string()));
    }

    #[test]
    fn test_csv_skip_empty_rows_and_pad_short_rows() {
        let table = CsvParser::new()
            .parse_str("name,year\nDune,1965\n,\nEmma\n")
            .unwrap();

        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].get("name"), Some(&"Emma".to_string()));
        assert_eq!(table.rows[1].get("year"), Some(&String::new()));
    }

    #[test]
    fn test_csv_parse_file() {
        let mut temp_file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(temp_file, "name,year").unwrap();
        writeln!(temp_file, "Dune,1965").unwrap();

        let table = UniversalFileParser::new().parse(temp_file.path()).unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_file_errors() {
        let missing = CsvParser::new().parse_file(Path::new("non_existent.csv"));
        assert!(matches!(missing, Err(ImportError::FileNotFound(_))));

        let temp_file = NamedTempFile::with_suffix(".ods").unwrap();
        let unsupported = UniversalFileParser::new().parse(temp_file.path());
        assert!(matches!(unsupported, Err(ImportError::UnsupportedFormat(ext)) if ext == "ods"));
    }

    #[test]
    fn test_excel_rejects_garbage() {
        let result = ExcelParser::new().parse(b"not a workbook");
        assert!(matches!(result, Err(ImportError::ExcelParseError(_))));
    }
}
