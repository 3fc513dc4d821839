// 该文件是 Shaowang （哨望） 项目的一部分。
// src/utils.rs - URL 参数解析工具
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

use std::collections::HashMap;
use std::str::FromStr;

use url::Url;

/// 将 URL 查询参数收集为键值表，后出现的同名参数覆盖先出现的
pub fn query_map(url: &Url) -> HashMap<String, String> {
  url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect()
}

/// 读取并解析查询参数，缺失或无法解析时返回默认值
pub fn query_or<T: FromStr>(query: &HashMap<String, String>, key: &str, default: T) -> T {
  query
    .get(key)
    .and_then(|v| v.parse::<T>().ok())
    .unwrap_or(default)
}

/// 查询参数是否出现（无论取值）
pub fn query_flag(query: &HashMap<String, String>, key: &str) -> bool {
  query
    .get(key)
    .map(|v| !matches!(v.as_str(), "0" | "false" | "no"))
    .unwrap_or(false)
}

/// 解码 URL 路径中的百分号转义，例如空格 `%20`
pub fn decoded_path(url: &Url) -> String {
  urlencoding::decode(url.path())
    .map(|p| p.into_owned())
    .unwrap_or_else(|_| url.path().to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_helpers_fall_back_to_defaults() {
    let url = Url::parse("test://pattern?frames=12&always&width=abc").unwrap();
    let query = query_map(&url);
    assert_eq!(query_or(&query, "frames", 0u64), 12);
    assert_eq!(query_or(&query, "width", 640u32), 640);
    assert!(query_flag(&query, "always"));
    assert!(!query_flag(&query, "record"));
  }

  #[test]
  fn path_is_percent_decoded() {
    let url = Url::parse("image:///tmp/my%20frame.png").unwrap();
    assert_eq!(decoded_path(&url), "/tmp/my frame.png");
  }
}
