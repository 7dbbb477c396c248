// ==========================================
// 表格数据导入引擎 - 字段消息集合
// ==========================================
// 有序 (字段 → 消息列表)，同一字段多次追加合并到同一条目
// ==========================================

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldMessages {
    entries: Vec<(String, Vec<String>)>,
}

impl FieldMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut messages = Self::new();
        messages.add(field, message);
        messages
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some((_, list)) => list.push(message),
            None => self.entries.push((field.to_string(), vec![message])),
        }
    }

    pub fn extend(&mut self, other: FieldMessages) {
        for (field, list) in other.entries {
            for message in list {
                self.add(&field, message);
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, list)| list.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(String, Vec<String>)> {
        self.entries
    }
}
