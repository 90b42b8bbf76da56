//! 嵌套路径提取
//!
//! 支持 `$.user.profile.age`、`$.items[0].name`、`$['key with space']`，
//! 以及不带 `$` 前缀的点号写法 `items.0.name`。

use crate::error::AlmanacError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// 解析路径表达式
fn parse(path: &str) -> Result<Vec<Segment>, AlmanacError> {
    let invalid = |reason: &str| AlmanacError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let body = path.strip_prefix('$').unwrap_or(path);
    let mut segments = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {}
            '[' => {
                if chars.peek() == Some(&'\'') || chars.peek() == Some(&'"') {
                    let quote = chars.next().unwrap_or('\'');
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some(c) if c == quote => break,
                            Some(c) => key.push(c),
                            None => return Err(invalid("未闭合的引号")),
                        }
                    }
                    if chars.next() != Some(']') {
                        return Err(invalid("缺少 ']'"));
                    }
                    segments.push(Segment::Key(key));
                } else {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) => digits.push(c),
                            None => return Err(invalid("缺少 ']'")),
                        }
                    }
                    let index = digits
                        .trim()
                        .parse()
                        .map_err(|_| invalid("数组下标必须是非负整数"))?;
                    segments.push(Segment::Index(index));
                }
            }
            _ => {
                let mut key = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    key.push(next);
                    chars.next();
                }
                segments.push(Segment::Key(key));
            }
        }
    }

    Ok(segments)
}

/// 从结构化值中提取子值
///
/// 作用于标量时原样返回；路径无法解析时返回 `PathNotFound`。
pub fn extract(fact: &str, value: &Value, path: &str) -> Result<Value, AlmanacError> {
    if !matches!(value, Value::Object(_) | Value::Array(_)) {
        return Ok(value.clone());
    }

    let not_found = || AlmanacError::PathNotFound {
        fact: fact.to_string(),
        path: path.to_string(),
    };

    let mut current = value;
    for segment in parse(path)? {
        current = match (current, &segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key).ok_or_else(not_found)?,
            (Value::Array(arr), Segment::Index(index)) => arr.get(*index).ok_or_else(not_found)?,
            // 点号写法下的数组下标，如 "items.0.name"
            (Value::Array(arr), Segment::Key(key)) => {
                let index: usize = key.parse().map_err(|_| not_found())?;
                arr.get(index).ok_or_else(not_found)?
            }
            _ => return Err(not_found()),
        };
    }

    Ok(current.clone())
}
