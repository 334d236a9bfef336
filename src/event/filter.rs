//! 事件过滤表达式
//!
//! LDAP 风格的过滤语言，作用于事件属性表：
//!
//! | 形式 | 含义 |
//! |------|------|
//! | `(k=v)` | 相等 |
//! | `(k=*)` | 存在 |
//! | `(k=ab*c)` | 子串通配 |
//! | `(k>=v)` / `(k<=v)` | 比较 |
//! | `(k~=v)` | 近似相等（忽略大小写与空白） |
//! | `(&..)` / `(\|..)` / `(!..)` | 与 / 或 / 非 |
//!
//! 反斜杠转义 `( ) * \`。最外层括号可省略，`k=v` 等价于 `(k=v)`。
//! 表达式在订阅时解析，语法错误在订阅时即返回 `CoreError::InvalidFilter`。

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::event::{Event, Properties};
use crate::utils::{CoreError, Result};

/// 已解析的过滤器
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    source: String,
    expr: FilterExpr,
}

#[derive(Debug, Clone, PartialEq)]
enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Present(String),
    Compare(String, CompareOp, String),
    Substring(String, Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Equal,
    Approx,
    GreaterOrEqual,
    LessOrEqual,
}

impl Filter {
    /// 解析过滤表达式
    pub fn parse(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(invalid(source, "过滤表达式为空"));
        }

        let wrapped;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({})", trimmed);
            wrapped.as_str()
        };

        let mut parser = Parser {
            source,
            chars: text.chars().collect(),
            pos: 0,
        };
        let expr = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("过滤表达式末尾存在多余字符"));
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// 原始表达式
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 判断属性表是否满足过滤器
    pub fn matches(&self, properties: &Properties) -> bool {
        self.expr.eval(properties)
    }

    /// 判断事件属性是否满足过滤器
    pub fn matches_event(&self, event: &Event) -> bool {
        self.matches(event.properties())
    }
}

impl FromStr for Filter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(source: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidFilter {
        filter: source.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// 解析
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> CoreError {
        invalid(self.source, format!("{} (位置 {})", reason, self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("期望 '{}'", expected)))
        }
    }

    fn parse_filter(&mut self) -> Result<FilterExpr> {
        self.skip_whitespace();
        self.expect('(')?;
        self.skip_whitespace();

        let expr = match self.peek() {
            Some('&') => {
                self.pos += 1;
                FilterExpr::And(self.parse_filter_list()?)
            }
            Some('|') => {
                self.pos += 1;
                FilterExpr::Or(self.parse_filter_list()?)
            }
            Some('!') => {
                self.pos += 1;
                FilterExpr::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("表达式意外结束")),
        };

        self.skip_whitespace();
        self.expect(')')?;
        Ok(expr)
    }

    fn parse_filter_list(&mut self) -> Result<Vec<FilterExpr>> {
        let mut list = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() != Some('(') {
                break;
            }
            list.push(self.parse_filter()?);
        }
        if list.is_empty() {
            return Err(self.error("组合运算符后至少需要一个子表达式"));
        }
        Ok(list)
    }

    fn parse_item(&mut self) -> Result<FilterExpr> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '>' | '<' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let key: String = self.chars[start..self.pos].iter().collect::<String>().trim().to_string();
        if key.is_empty() {
            return Err(self.error("缺少属性名"));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                CompareOp::Equal
            }
            Some(c @ ('~' | '>' | '<')) => {
                self.pos += 1;
                self.expect('=')?;
                match c {
                    '~' => CompareOp::Approx,
                    '>' => CompareOp::GreaterOrEqual,
                    _ => CompareOp::LessOrEqual,
                }
            }
            _ => return Err(self.error("缺少比较运算符")),
        };

        let parts = self.parse_value()?;

        if op != CompareOp::Equal || parts.len() == 1 {
            // 非相等运算中 `*` 按字面值处理
            return Ok(FilterExpr::Compare(key, op, parts.join("*")));
        }
        if parts.len() == 2 && parts.iter().all(String::is_empty) {
            return Ok(FilterExpr::Present(key));
        }
        Ok(FilterExpr::Substring(key, parts))
    }

    /// 读取值直到未转义的 `)`，按未转义的 `*` 切分
    fn parse_value(&mut self) -> Result<Vec<String>> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("值未闭合，缺少 ')'")),
                Some(')') => break,
                Some('(') => return Err(self.error("值中出现未转义的 '('")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("转义符后缺少字符"))?;
                    if let Some(last) = parts.last_mut() {
                        last.push(escaped);
                    }
                    self.pos += 1;
                }
                Some('*') => {
                    parts.push(String::new());
                    self.pos += 1;
                }
                Some(c) => {
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                    self.pos += 1;
                }
            }
        }
        Ok(parts)
    }
}

// ============================================================================
// 求值
// ============================================================================

impl FilterExpr {
    fn eval(&self, properties: &Properties) -> bool {
        match self {
            FilterExpr::And(list) => list.iter().all(|e| e.eval(properties)),
            FilterExpr::Or(list) => list.iter().any(|e| e.eval(properties)),
            FilterExpr::Not(inner) => !inner.eval(properties),
            FilterExpr::Present(key) => properties.get(key).map_or(false, |v| !v.is_null()),
            FilterExpr::Compare(key, op, operand) => properties
                .get(key)
                .map_or(false, |v| compare_value(v, *op, operand)),
            FilterExpr::Substring(key, parts) => properties
                .get(key)
                .map_or(false, |v| substring_value(v, parts)),
        }
    }
}

fn compare_value(value: &Value, op: CompareOp, operand: &str) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| compare_value(item, op, operand)),
        Value::String(s) => match op {
            CompareOp::Equal => s == operand,
            CompareOp::Approx => normalize(s) == normalize(operand),
            CompareOp::GreaterOrEqual => s.as_str() >= operand,
            CompareOp::LessOrEqual => s.as_str() <= operand,
        },
        Value::Number(n) => {
            let operand = operand.trim();
            if let (Some(lhs), Ok(rhs)) = (n.as_i64(), operand.parse::<i64>()) {
                return compare_ordered(lhs, rhs, op);
            }
            match (n.as_f64(), operand.parse::<f64>()) {
                (Some(lhs), Ok(rhs)) => match op {
                    CompareOp::Equal | CompareOp::Approx => lhs == rhs,
                    CompareOp::GreaterOrEqual => lhs >= rhs,
                    CompareOp::LessOrEqual => lhs <= rhs,
                },
                _ => false,
            }
        }
        Value::Bool(b) => match op {
            CompareOp::Equal | CompareOp::Approx => operand
                .trim()
                .parse::<bool>()
                .or_else(|_| operand.trim().to_ascii_lowercase().parse::<bool>())
                .map_or(false, |rhs| *b == rhs),
            _ => false,
        },
        Value::Null | Value::Object(_) => false,
    }
}

fn compare_ordered<T: PartialOrd>(lhs: T, rhs: T, op: CompareOp) -> bool {
    match op {
        CompareOp::Equal | CompareOp::Approx => lhs == rhs,
        CompareOp::GreaterOrEqual => lhs >= rhs,
        CompareOp::LessOrEqual => lhs <= rhs,
    }
}

fn substring_value(value: &Value, parts: &[String]) -> bool {
    match value {
        Value::String(s) => glob_match(parts, s),
        Value::Array(items) => items.iter().any(|item| substring_value(item, parts)),
        _ => false,
    }
}

/// `parts` 至少两段：首段为前缀，末段为后缀，中间各段按顺序出现
fn glob_match(parts: &[String], text: &str) -> bool {
    let last_index = parts.len() - 1;
    let mut remaining = text;

    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match remaining.strip_prefix(part.as_str()) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == last_index {
            return remaining.ends_with(part.as_str());
        } else {
            match remaining.find(part.as_str()) {
                Some(idx) => remaining = &remaining[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
