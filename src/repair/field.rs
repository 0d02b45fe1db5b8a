use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::error::{FleetError, Result};
use crate::models::{ColumnSpec, ErrorKind, FieldKind};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub kind: ErrorKind,
    pub details: String,
}

/// Result of repairing one field. `value` is always the value to carry forward.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOutcome {
    pub value: String,
    pub repaired: bool,
    pub description: Option<String>,
    pub error: Option<FieldError>,
}

impl FieldOutcome {
    fn accepted(value: &str) -> Self {
        Self {
            value: value.to_string(),
            repaired: false,
            description: None,
            error: None,
        }
    }

    fn repaired(value: String, description: String) -> Self {
        Self {
            value,
            repaired: true,
            description: Some(description),
            error: None,
        }
    }

    fn failed(value: &str, kind: ErrorKind, details: String) -> Self {
        Self {
            value: value.to_string(),
            repaired: false,
            description: None,
            error: Some(FieldError { kind, details }),
        }
    }
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})([/-])(\d{1,2})([/-])(\d{4})$").unwrap())
}

fn currency_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]{2,3}\.?)\s*").unwrap())
}

fn currency_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*([A-Za-z]{2,3}\.?)$").unwrap())
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap())
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '﷼'];

/// Repair a single value according to its column's semantic type.
pub fn repair_field(value: &str, column: &ColumnSpec) -> FieldOutcome {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if column.required {
            return FieldOutcome::failed(
                trimmed,
                ErrorKind::MissingValue,
                format!("{} is required but empty", column.name),
            );
        }
        return FieldOutcome::accepted(trimmed);
    }
    match column.kind {
        FieldKind::Date => repair_date(trimmed, &column.name),
        FieldKind::Numeric => repair_numeric(trimmed, &column.name),
        FieldKind::Status(allowed) => repair_status(trimmed, &column.name, allowed),
        FieldKind::Text => FieldOutcome::accepted(trimmed),
    }
}

/// Repair the field at `index`, looking up its column by position.
pub fn repair_at(values: &[String], index: usize, columns: &[ColumnSpec]) -> Result<FieldOutcome> {
    let column = columns.get(index).ok_or(FleetError::MissingColumn(index))?;
    let value = values.get(index).map(String::as_str).unwrap_or("");
    Ok(repair_field(value, column))
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

fn days_in_month(year: i32, month: u32) -> Option<i64> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(next.signed_duration_since(first).num_days())
}

fn repair_date(value: &str, column: &str) -> FieldOutcome {
    let format_error = || {
        FieldOutcome::failed(
            value,
            ErrorKind::InvalidDate,
            format!("{column}: '{value}' is not a date in DD/MM/YYYY or DD-MM-YYYY format"),
        )
    };
    let Some(caps) = date_re().captures(value) else {
        return format_error();
    };
    if caps[2] != caps[4] {
        return format_error();
    }
    let (Ok(day), Ok(month), Ok(year)) = (
        caps[1].parse::<u32>(),
        caps[3].parse::<u32>(),
        caps[5].parse::<i32>(),
    ) else {
        return format_error();
    };

    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
        let details = match (chrono::Month::try_from(month as u8), days_in_month(year, month)) {
            (Ok(m), Some(days)) => format!(
                "{column}: '{value}' is not a valid date, {} {year} has {days} days",
                m.name()
            ),
            _ => format!("{column}: '{value}' is not a valid date, month {month} is out of range"),
        };
        return FieldOutcome::failed(value, ErrorKind::InvalidDate, details);
    };

    let canonical = format!("{:02}/{:02}/{:04}", date.day(), date.month(), date.year());
    if canonical == value {
        FieldOutcome::accepted(value)
    } else {
        let reason = format!("Normalized {column} '{value}' to '{canonical}'");
        FieldOutcome::repaired(canonical, reason)
    }
}

/// Convert a canonical `DD/MM/YYYY` value to ISO `YYYY-MM-DD`.
pub fn date_to_iso(value: &str) -> Option<String> {
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

fn repair_numeric(value: &str, column: &str) -> FieldOutcome {
    let mut s = value.to_string();
    let mut removed: Vec<String> = Vec::new();
    let mut negate = false;

    if s.len() >= 2 && s.starts_with('(') && s.ends_with(')') {
        s = s[1..s.len() - 1].trim().to_string();
        removed.push("parentheses".to_string());
        negate = true;
    }

    if let Some(m) = currency_prefix_re().find(&s) {
        if m.end() < s.len() {
            removed.push(format!("'{}'", m.as_str().trim()));
            s = s[m.end()..].to_string();
        }
    }
    if let Some(m) = currency_suffix_re().find(&s) {
        if m.start() > 0 {
            removed.push(format!("'{}'", m.as_str().trim()));
            s.truncate(m.start());
        }
    }

    let mut symbols: Vec<char> = Vec::new();
    let mut had_space = false;
    s.retain(|c| {
        if CURRENCY_SYMBOLS.contains(&c) {
            if !symbols.contains(&c) {
                symbols.push(c);
            }
            false
        } else if c.is_whitespace() {
            had_space = true;
            false
        } else {
            true
        }
    });
    removed.extend(symbols.iter().map(|c| format!("'{c}'")));
    if had_space {
        removed.push("whitespace".to_string());
    }

    if let Some(rest) = s.strip_prefix('+') {
        s = rest.to_string();
        removed.push("'+'".to_string());
    }

    if s.contains(',') {
        let commas = s.matches(',').count();
        let decimals = s.rsplit(',').next().map(str::len).unwrap_or(0);
        if commas == 1 && !s.contains('.') && (1..=2).contains(&decimals) {
            s = s.replace(',', ".");
            removed.push("decimal comma".to_string());
        } else {
            s = s.replace(',', "");
            removed.push("','".to_string());
        }
    }

    if negate && s.starts_with('-') {
        return FieldOutcome::failed(
            value,
            ErrorKind::InvalidNumeric,
            format!("{column}: '{value}' mixes parentheses with a minus sign"),
        );
    }
    if !number_re().is_match(&s) {
        return FieldOutcome::failed(
            value,
            ErrorKind::InvalidNumeric,
            format!("{column}: '{value}' is not a valid number"),
        );
    }
    if negate {
        s.insert(0, '-');
    }

    if s == value {
        FieldOutcome::accepted(value)
    } else {
        let reason = format!(
            "Stripped {} from {column}: '{value}' -> '{s}'",
            removed.join(", ")
        );
        FieldOutcome::repaired(s, reason)
    }
}

// ---------------------------------------------------------------------------
// Status values
// ---------------------------------------------------------------------------

fn repair_status(value: &str, column: &str, allowed: &[&str]) -> FieldOutcome {
    let normalized = value
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if !allowed.contains(&normalized.as_str()) {
        return FieldOutcome::failed(
            value,
            ErrorKind::InvalidStatus,
            format!(
                "{column}: '{value}' is not a recognised status (expected one of: {})",
                allowed.join(", ")
            ),
        );
    }
    if normalized == value {
        FieldOutcome::accepted(value)
    } else {
        let reason = format!("Normalized {column} '{value}' to '{normalized}'");
        FieldOutcome::repaired(normalized, reason)
    }
}
