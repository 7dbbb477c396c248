// ==========================================
// 表格数据导入引擎 - 宽松日期时间解析
// ==========================================
// 规则:
// - 空白 → None
// - 年份四位在前 → 年-月-日
// - 其余三段数字 → 日/月/年（middle_endian 时为 月/日/年）
// - 月份超过 12 而日不超过 12 时两者互换
// - 日、月均 ≤ 12 且不相等时标记为歧义（由调用方产生警告）
// - 两位年份取距当前年份最近的世纪
// ==========================================

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime};
use thiserror::Error;

/// 存储/展示用的日期时间格式
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无法解析日期时间: {0}")]
pub struct DateParseError(pub String);

/// 解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDateTime {
    pub value: NaiveDateTime,
    /// 日/月可互换（按端序规则取其一）
    pub ambiguous: bool,
}

impl ParsedDateTime {
    pub fn formatted(&self) -> String {
        self.value.format(DATETIME_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

#[derive(Debug, Default)]
struct Tokens {
    numbers: Vec<(u32, usize)>, // (数值, 位数)
    month_name: Option<u32>,
    time: Option<(u32, u32, u32, u32)>, // 时、分、秒、纳秒
    meridiem: Option<Meridiem>,
    compact: Option<String>, // YYYYMMDD / YYYYMMDDHHMMSS
}

// ==========================================
// DateParser
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct DateParser {
    middle_endian: bool,
}

impl DateParser {
    pub fn new(middle_endian: bool) -> Self {
        Self { middle_endian }
    }

    pub fn is_middle_endian(&self) -> bool {
        self.middle_endian
    }

    /// 解析单元格文本
    ///
    /// # 返回
    /// - Ok(None): 空白
    /// - Ok(Some(..)): 解析成功
    /// - Err: 无法识别
    pub fn parse(&self, raw: &str) -> Result<Option<ParsedDateTime>, DateParseError> {
        let text = raw.trim();
        if text.is_empty() {
            return Ok(None);
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(Some(ParsedDateTime {
                value: dt.naive_local(),
                ambiguous: false,
            }));
        }

        let tokens = tokenize(text).ok_or_else(|| DateParseError(text.to_string()))?;
        self.assemble(tokens)
            .map(Some)
            .ok_or_else(|| DateParseError(text.to_string()))
    }

    fn assemble(&self, tokens: Tokens) -> Option<ParsedDateTime> {
        let (date, time, ambiguous) = match &tokens.compact {
            Some(compact) => {
                if !tokens.numbers.is_empty() || tokens.month_name.is_some() {
                    return None;
                }
                let (date, time) = parse_compact(compact)?;
                (date, time.or(tokens.time), false)
            }
            None => {
                let (date, ambiguous) = self.resolve_date(&tokens)?;
                (date, tokens.time, ambiguous)
            }
        };

        let (mut hour, minute, second, nano) = time.unwrap_or((0, 0, 0, 0));
        match tokens.meridiem {
            Some(_) if hour == 0 || hour > 12 => return None,
            Some(Meridiem::Pm) if hour < 12 => hour += 12,
            Some(Meridiem::Am) if hour == 12 => hour = 0,
            _ => {}
        }

        let value = date.and_hms_nano_opt(hour, minute, second, nano)?;
        Some(ParsedDateTime { value, ambiguous })
    }

    fn resolve_date(&self, tokens: &Tokens) -> Option<(NaiveDate, bool)> {
        let numbers = &tokens.numbers;

        if let Some(month) = tokens.month_name {
            // "12 February 2018" / "February 12, 2018" / "2018 Feb 12"
            if numbers.len() != 2 {
                return None;
            }
            let (year, day) = if is_year_like(numbers[0]) {
                (numbers[0], numbers[1].0)
            } else {
                (numbers[1], numbers[0].0)
            };
            let date = NaiveDate::from_ymd_opt(expand_year(year), month, day)?;
            return Some((date, false));
        }

        if numbers.len() != 3 {
            return None;
        }

        if is_year_like(numbers[0]) {
            let date = NaiveDate::from_ymd_opt(expand_year(numbers[0]), numbers[1].0, numbers[2].0)?;
            return Some((date, false));
        }

        let (mut day, mut month) = if self.middle_endian {
            (numbers[1].0, numbers[0].0)
        } else {
            (numbers[0].0, numbers[1].0)
        };
        if month > 12 && day <= 12 {
            std::mem::swap(&mut day, &mut month);
        }
        let ambiguous = day <= 12 && month <= 12 && day != month;

        let date = NaiveDate::from_ymd_opt(expand_year(numbers[2]), month, day)?;
        Some((date, ambiguous))
    }
}

fn is_year_like((value, digits): (u32, usize)) -> bool {
    digits >= 3 || value > 31
}

/// 两位年份 → 距当前年份 50 年以内的四位年份
fn expand_year(number: (u32, usize)) -> i32 {
    expand_year_around(number, Local::now().year())
}

/// 窗口: [current - 50, current + 50)
fn expand_year_around((value, digits): (u32, usize), current: i32) -> i32 {
    let year = value as i32;
    if digits > 2 {
        return year;
    }
    let century = current - current % 100;
    let mut expanded = century + year;
    if expanded >= current + 50 {
        expanded -= 100;
    } else if expanded < current - 50 {
        expanded += 100;
    }
    expanded
}

fn parse_compact(compact: &str) -> Option<(NaiveDate, Option<(u32, u32, u32, u32)>)> {
    let num = |range: std::ops::Range<usize>| compact.get(range)?.parse::<u32>().ok();
    let date = NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?)?;
    if compact.len() == 14 {
        return Some((date, Some((num(8..10)?, num(10..12)?, num(12..14)?, 0))));
    }
    Some((date, None))
}

fn tokenize(text: &str) -> Option<Tokens> {
    let normalized = split_iso_t(text);
    let mut tokens = Tokens::default();

    for token in normalized
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let lower = token.to_lowercase();

        if let Some(meridiem) = parse_meridiem(&lower) {
            tokens.meridiem = Some(meridiem);
            continue;
        }
        if lower == "z" || lower == "utc" || lower == "gmt" {
            continue;
        }

        // 时间: "17:06", "17:06:46.123", "5:06pm", "5pm"
        let (body, suffix) = split_meridiem_suffix(&lower);
        if body.contains(':') || (suffix.is_some() && body.chars().all(|c| c.is_ascii_digit())) {
            if tokens.time.is_some() {
                return None;
            }
            tokens.time = Some(parse_time(body)?);
            if suffix.is_some() {
                tokens.meridiem = suffix;
            }
            continue;
        }

        if lower.chars().all(|c| c.is_ascii_alphabetic() || c == '.') {
            let word = lower.trim_end_matches('.');
            if word.len() >= 3 {
                if let Some(idx) = MONTH_NAMES.iter().position(|m| word.starts_with(m)) {
                    if tokens.month_name.is_some() {
                        return None;
                    }
                    tokens.month_name = Some(idx as u32 + 1);
                    continue;
                }
                if WEEKDAY_NAMES.iter().any(|d| word.starts_with(d)) {
                    continue;
                }
            }
            return None;
        }

        if lower.chars().all(|c| c.is_ascii_digit()) {
            if lower.len() == 8 || lower.len() == 14 {
                if tokens.compact.is_some() {
                    return None;
                }
                tokens.compact = Some(lower);
                continue;
            }
            // "12th" 之类的序数后缀不在此列
            tokens.numbers.push((lower.parse().ok()?, lower.len()));
            continue;
        }

        // 分隔的数字日期: 01/02/03, 2001-02-03, 3.2.2001
        let parts: Vec<&str> = lower.split(['/', '-', '.']).collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
            return None;
        }
        for part in parts {
            tokens.numbers.push((part.parse().ok()?, part.len()));
        }
    }

    Some(tokens)
}

/// 数字之间的 'T' 视为日期与时间的分隔
fn split_iso_t(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (idx, c) in chars.iter().enumerate() {
        let between_digits = idx > 0
            && idx + 1 < chars.len()
            && chars[idx - 1].is_ascii_digit()
            && chars[idx + 1].is_ascii_digit();
        if (*c == 'T' || *c == 't') && between_digits {
            out.push(' ');
        } else {
            out.push(*c);
        }
    }
    out
}

fn parse_meridiem(lower: &str) -> Option<Meridiem> {
    match lower {
        "am" | "a.m." => Some(Meridiem::Am),
        "pm" | "p.m." => Some(Meridiem::Pm),
        _ => None,
    }
}

fn split_meridiem_suffix(lower: &str) -> (&str, Option<Meridiem>) {
    if let Some(body) = lower.strip_suffix("am") {
        return (body, Some(Meridiem::Am));
    }
    if let Some(body) = lower.strip_suffix("pm") {
        return (body, Some(Meridiem::Pm));
    }
    (lower, None)
}

fn parse_time(body: &str) -> Option<(u32, u32, u32, u32)> {
    let parts: Vec<&str> = body.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let hour: u32 = parts[0].parse().ok()?;
    let minute: u32 = match parts.get(1) {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    let (second, nano) = match parts.get(2) {
        Some(s) => match s.split_once('.') {
            Some((whole, frac)) => {
                let digits: String = frac.chars().take(9).collect();
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                let nano = digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32);
                (whole.parse().ok()?, nano)
            }
            None => (s.parse().ok()?, 0),
        },
        None => (0, 0),
    };

    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    Some((hour, minute, second, nano))
}
