// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/label.rs - 类别名称映射
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

/// 类别 ID 到类别名称的映射。
///
/// 构造时根据来源映射的形状选定查找策略：字典按键查找，列表按下标查找，
/// 其余情况直接把 ID 转成字符串。查不到时同样退回 ID 字符串。
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LabelMap {
  Dict(BTreeMap<i64, String>),
  List(Vec<String>),
  #[default]
  Id,
}

impl LabelMap {
  pub fn name(&self, class_id: i64) -> String {
    let found = match self {
      LabelMap::Dict(names) => names.get(&class_id).cloned(),
      LabelMap::List(names) => usize::try_from(class_id)
        .ok()
        .and_then(|idx| names.get(idx))
        .cloned(),
      LabelMap::Id => None,
    };
    found.unwrap_or_else(|| class_id.to_string())
  }

  pub fn from_json(value: &Value) -> Self {
    match value {
      Value::Object(entries) => LabelMap::Dict(
        entries
          .iter()
          .filter_map(|(key, name)| {
            let id = key.trim().parse::<i64>().ok()?;
            Some((id, json_to_name(name)))
          })
          .collect(),
      ),
      Value::Array(names) => LabelMap::List(names.iter().map(json_to_name).collect()),
      _ => LabelMap::Id,
    }
  }

  /// 解析模型元数据中的类别表，支持 JSON 以及 `{0: 'person', 1: 'car'}`
  /// 或 `['person', 'car']` 形式的字面量
  pub fn from_literal(text: &str) -> Self {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
      return Self::from_json(&value);
    }

    let text = text.trim();
    if let Some(inner) = text.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
      let mut names = BTreeMap::new();
      for item in split_items(inner) {
        let Some((key, name)) = item.split_once(':') else {
          warn!("无法解析类别条目: {}", item);
          continue;
        };
        match key.trim().parse::<i64>() {
          Ok(id) => {
            names.insert(id, unquote(name).to_string());
          }
          Err(_) => warn!("类别 ID 不是整数: {}", key),
        }
      }
      return LabelMap::Dict(names);
    }

    if let Some(inner) = text.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
      return LabelMap::List(
        split_items(inner)
          .into_iter()
          .map(|name| unquote(name).to_string())
          .collect(),
      );
    }

    warn!("无法识别的类别表: {}", text);
    LabelMap::Id
  }
}

fn json_to_name(value: &Value) -> String {
  match value {
    Value::String(name) => name.clone(),
    other => other.to_string(),
  }
}

// 按引号外的逗号切分
fn split_items(inner: &str) -> Vec<&str> {
  let mut items = Vec::new();
  let mut quote: Option<char> = None;
  let mut start = 0;

  for (idx, c) in inner.char_indices() {
    match (quote, c) {
      (Some(q), c) if c == q => quote = None,
      (None, '\'' | '"') => quote = Some(c),
      (None, ',') => {
        items.push(&inner[start..idx]);
        start = idx + 1;
      }
      _ => {}
    }
  }
  items.push(&inner[start..]);

  items
    .into_iter()
    .map(str::trim)
    .filter(|item| !item.is_empty())
    .collect()
}

fn unquote(text: &str) -> &str {
  let text = text.trim();
  for q in ['\'', '"'] {
    if let Some(inner) = text.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
      return inner;
    }
  }
  text
}
