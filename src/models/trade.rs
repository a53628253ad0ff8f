use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::import::values::leading_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("Direction must be either LONG or SHORT, got \"{}\"", other)),
        }
    }
}

impl ToSql for Direction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Direction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// A stored trade. Field names on the wire match the original API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub idu: String,
    #[serde(rename = "data")]
    pub date: DateTime<Utc>,
    #[serde(rename = "ativo")]
    pub asset: String,
    #[serde(rename = "direcao")]
    pub direction: Direction,
    #[serde(rename = "percentual")]
    pub percentage: f64,
    #[serde(rename = "alvo")]
    pub target: f64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Validated trade fields, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub idu: String,
    pub date: DateTime<Utc>,
    pub asset: String,
    pub direction: Direction,
    pub percentage: f64,
    pub target: f64,
}

/// Numbers arrive either as JSON numbers or as strings typed into a form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    Number(f64),
    Text(String),
}

impl NumericInput {
    pub fn value(&self) -> Option<f64> {
        match self {
            NumericInput::Number(n) if n.is_finite() => Some(*n),
            NumericInput::Number(_) => None,
            NumericInput::Text(s) => leading_number(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeInput {
    pub idu: String,
    #[serde(rename = "data")]
    pub date: String,
    #[serde(rename = "ativo")]
    pub asset: String,
    #[serde(rename = "direcao")]
    pub direction: String,
    #[serde(rename = "percentual")]
    pub percentage: NumericInput,
    #[serde(rename = "alvo", default)]
    pub target: Option<NumericInput>,
}

impl TradeInput {
    pub fn validate(&self) -> AppResult<NewTrade> {
        let idu = self.idu.trim();
        if idu.is_empty() {
            return Err(AppError::Validation("IDU is required".to_string()));
        }

        let asset = self.asset.trim();
        if asset.is_empty() {
            return Err(AppError::Validation("Ativo is required".to_string()));
        }

        let direction = self
            .direction
            .parse::<Direction>()
            .map_err(AppError::Validation)?;

        let date = parse_timestamp(&self.date)
            .ok_or_else(|| AppError::Validation(format!("Invalid date: {}", self.date)))?;

        let percentage = self.percentage.value().ok_or_else(|| {
            AppError::Validation(format!("Invalid percentual: {:?}", self.percentage))
        })?;

        // Unparseable targets are stored as zero
        let target = self
            .target
            .as_ref()
            .and_then(NumericInput::value)
            .unwrap_or(0.0);

        Ok(NewTrade {
            idu: idu.to_string(),
            date,
            asset: asset.to_string(),
            direction,
            percentage,
            target,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTradeInput {
    pub id: i64,
    #[serde(flatten)]
    pub fields: TradeInput,
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS[.fff]]`, `YYYY-MM-DD HH:MM:SS`
/// and `YYYY-MM-DD`. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(midnight_utc)
}

pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Inverse of the `i64` columns the trades table stores.
pub fn from_unix(secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("Invalid timestamp: {}", secs).into(),
        )
    })
}
