use chrono::{Days, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::mapping::ResolvedMapping;
use super::{ImportError, RawTable};
use crate::models::{midnight_utc, Direction, NewTrade};

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?").expect("leading number pattern is valid")
});

/// How percentage cells are scaled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentMode {
    /// Fractions between 0 and 1 are read as ratios and multiplied by 100.
    #[default]
    Auto,
    Raw,
    Multiply,
}

/// Parses the numeric prefix of `raw`, ignoring surrounding whitespace.
/// `"2.5abc"` gives 2.5; text without a numeric prefix gives `None`.
pub fn leading_number(raw: &str) -> Option<f64> {
    LEADING_NUMBER
        .find(raw.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn is_blank(value: &str) -> bool {
    value.is_empty() || value == "-"
}

pub fn parse_percentage(raw: &str, mode: PercentMode) -> Result<f64, String> {
    let original = raw.trim();
    if is_blank(original) {
        return Ok(0.0);
    }

    let unquoted = original.strip_prefix('"').unwrap_or(original);
    let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted).trim();
    if unquoted == "0" || unquoted == "0%" {
        return Ok(0.0);
    }

    let cleaned = unquoted.replace('%', "");
    let cleaned = cleaned.trim();
    let invalid = || format!("invalid percentual: \"{}\"", original);

    if cleaned.contains(',') {
        // Brazilian format: 1.234,56
        let (negative, digits) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned),
        };
        let normalized = digits.replace('.', "").replacen(',', ".", 1);
        let mut value = leading_number(&normalized).ok_or_else(invalid)?;

        if mode == PercentMode::Multiply || (mode == PercentMode::Auto && value < 1.0) {
            value *= 100.0;
        }
        Ok(if negative { -value } else { value })
    } else {
        let mut value = leading_number(cleaned).ok_or_else(invalid)?;
        let fraction = value.abs() > 0.0 && value.abs() < 1.0;
        if mode == PercentMode::Multiply || (mode == PercentMode::Auto && fraction) {
            value *= 100.0;
        }
        Ok(value)
    }
}

pub fn parse_target(raw: &str) -> Result<f64, String> {
    let value = raw.trim();
    if is_blank(value) {
        return Ok(0.0);
    }

    leading_number(&value.replacen(',', ".", 1))
        .ok_or_else(|| format!("invalid alvo: \"{}\" (expected a number)", value))
}

/// `DD/MM/YYYY`, `YYYY-MM-DD[...]` or a spreadsheet serial day number.
pub fn parse_import_date(raw: &str) -> Result<NaiveDate, String> {
    let value = raw.trim();
    if is_blank(value) {
        return Err("data must not be empty".to_string());
    }
    let invalid = || format!("invalid date: \"{}\"", value);

    if value.contains('/') {
        let mut parts = value.split('/').map(|part| leading_number(part).map(|n| n as i64));
        let (Some(Some(day)), Some(Some(month)), Some(Some(year))) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let year = if (0..100).contains(&year) { 2000 + year } else { year };

        let (Ok(year), Ok(month), Ok(day)) = (i32::try_from(year), u32::try_from(month), u32::try_from(day)) else {
            return Err(invalid());
        };
        return NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid);
    }

    if value.contains('-') {
        let date_part = value.split(['T', ' ']).next().unwrap_or(value);
        return NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| invalid());
    }

    let serial = leading_number(value).ok_or_else(invalid)?;
    serial_to_date(serial).ok_or_else(invalid)
}

/// Day numbers of the 1900 date system. Serial 1 is 1900-01-01; serials from
/// 60 onwards account for the phantom 1900-02-29.
fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    let days = serial.floor();
    if days < 1.0 || days > 2_958_465.0 {
        return None;
    }
    let days = days as u64;

    let epoch = if days < 60 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    epoch.checked_add_days(Days::new(days))
}

fn required_text<'a>(value: &'a str, field: &str) -> Result<&'a str, String> {
    let value = value.trim();
    if is_blank(value) {
        Err(format!("{} must not be empty (found \"{}\")", field, value))
    } else {
        Ok(value)
    }
}

/// Turns every data row into a [`NewTrade`]. The first failing row aborts
/// the whole batch.
pub fn normalize_rows(
    table: &RawTable,
    mapping: &ResolvedMapping,
    mode: PercentMode,
) -> Result<Vec<NewTrade>, ImportError> {
    table
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            normalize_row(row, mapping, mode).map_err(|message| ImportError::row(index + 1, message))
        })
        .collect()
}

fn normalize_row(row: &[String], mapping: &ResolvedMapping, mode: PercentMode) -> Result<NewTrade, String> {
    let cell = |index: usize| row.get(index).map(String::as_str).unwrap_or("");

    let idu = required_text(cell(mapping.idu), "idu")?;
    let asset = required_text(cell(mapping.asset), "ativo")?;
    let direction = required_text(cell(mapping.direction), "direcao")?.parse::<Direction>()?;
    let date = parse_import_date(cell(mapping.date))?;
    let percentage = parse_percentage(cell(mapping.percentage), mode)?;
    let target = parse_target(cell(mapping.target))?;

    Ok(NewTrade {
        idu: idu.to_string(),
        date: midnight_utc(date),
        asset: asset.to_string(),
        direction,
        percentage,
        target,
    })
}
