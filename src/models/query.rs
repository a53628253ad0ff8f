use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::trade::{midnight_utc, parse_timestamp, Direction, Trade};

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 50;

/// Raw query string of the listing and stats endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub all: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub idu: Option<String>,
    pub ativo: Option<String>,
    pub direcao: Option<String>,
    #[serde(rename = "dataInicio")]
    pub data_inicio: Option<String>,
    #[serde(rename = "dataFim")]
    pub data_fim: Option<String>,
    #[serde(rename = "orderBy")]
    pub order_by: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeFilters {
    pub idu: Option<String>,
    pub asset: Option<String>,
    pub direction: Option<Direction>,
    /// Inclusive lower bound, unix seconds.
    pub from: Option<i64>,
    /// Inclusive upper bound, unix seconds.
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Idu,
    Date,
    Asset,
    Direction,
    Percentage,
    Target,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "id" => Ok(SortField::Id),
            "idu" => Ok(SortField::Idu),
            "data" => Ok(SortField::Date),
            "ativo" => Ok(SortField::Asset),
            "direcao" => Ok(SortField::Direction),
            "percentual" => Ok(SortField::Percentage),
            "alvo" => Ok(SortField::Target),
            "createdAt" => Ok(SortField::CreatedAt),
            "updatedAt" => Ok(SortField::UpdatedAt),
            other => Err(AppError::Validation(format!("Invalid orderBy field: {}", other))),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Idu => "idu",
            SortField::Date => "data",
            SortField::Asset => "ativo",
            SortField::Direction => "direcao",
            SortField::Percentage => "percentual",
            SortField::Target => "alvo",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn parse(raw: &str) -> AppResult<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(AppError::Validation(format!("Invalid order: {}", other))),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    /// Rows to skip. Saturates for pages far past the end, which SQLite
    /// answers with an empty result.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filters: TradeFilters,
    pub sort: SortField,
    pub order: SortOrder,
    /// `None` returns every matching row.
    pub pagination: Option<Pagination>,
}

impl ListParams {
    pub fn to_filters(&self) -> AppResult<TradeFilters> {
        let direction = match non_empty(&self.direcao) {
            Some(raw) => Some(raw.parse::<Direction>().map_err(AppError::Validation)?),
            None => None,
        };

        let from = match non_empty(&self.data_inicio) {
            Some(raw) => Some(parse_bound(raw, false)?),
            None => None,
        };
        let to = match non_empty(&self.data_fim) {
            Some(raw) => Some(parse_bound(raw, true)?),
            None => None,
        };

        Ok(TradeFilters {
            idu: non_empty(&self.idu).map(str::to_string),
            asset: non_empty(&self.ativo).map(str::to_string),
            direction,
            from,
            to,
        })
    }

    pub fn to_list_query(&self) -> AppResult<ListQuery> {
        let filters = self.to_filters()?;

        let sort = match non_empty(&self.order_by) {
            Some(raw) => SortField::parse(raw)?,
            None => SortField::CreatedAt,
        };
        let order = match non_empty(&self.order) {
            Some(raw) => SortOrder::parse(raw)?,
            None => SortOrder::Desc,
        };

        let return_all = non_empty(&self.all) == Some("true");
        let pagination = if return_all {
            None
        } else {
            Some(Pagination {
                page: positive(&self.page, "page", DEFAULT_PAGE)?,
                limit: positive(&self.limit, "limit", DEFAULT_LIMIT)?,
            })
        };

        Ok(ListQuery {
            filters,
            sort,
            order,
            pagination,
        })
    }

    /// Raw calendar dates of the date filters, used to walk months in stats.
    pub fn date_range(&self) -> AppResult<(Option<NaiveDate>, Option<NaiveDate>)> {
        let start = match non_empty(&self.data_inicio) {
            Some(raw) => Some(parse_bound_date(raw)?),
            None => None,
        };
        let end = match non_empty(&self.data_fim) {
            Some(raw) => Some(parse_bound_date(raw)?),
            None => None,
        };
        Ok((start, end))
    }
}

impl TradeFilters {
    /// SQL conditions (to be AND-ed) and their bound parameters.
    pub fn sql_conditions(&self) -> (Vec<&'static str>, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(idu) = &self.idu {
            conditions.push("idu LIKE ? ESCAPE '\\'");
            params.push(Box::new(like_pattern(idu)));
        }
        if let Some(asset) = &self.asset {
            conditions.push("ativo LIKE ? ESCAPE '\\'");
            params.push(Box::new(like_pattern(asset)));
        }
        if let Some(direction) = self.direction {
            conditions.push("direcao = ?");
            params.push(Box::new(direction));
        }
        if let Some(from) = self.from {
            conditions.push("data >= ?");
            params.push(Box::new(from));
        }
        if let Some(to) = self.to {
            conditions.push("data <= ?");
            params.push(Box::new(to));
        }

        (conditions, params)
    }

    /// `WHERE ...` clause, or an empty string when nothing is filtered.
    pub fn where_clause(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let (conditions, params) = self.sql_conditions();
        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ListMeta {
    Paged {
        page: i64,
        limit: i64,
        total: i64,
        #[serde(rename = "totalPages")]
        total_pages: i64,
        #[serde(rename = "hasNext")]
        has_next: bool,
        #[serde(rename = "hasPrev")]
        has_prev: bool,
    },
    All {
        total: i64,
    },
}

impl ListMeta {
    pub fn paged(pagination: Pagination, total: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total - 1) / pagination.limit + 1
        };
        ListMeta::Paged {
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages,
            has_next: pagination.page < total_pages,
            has_prev: pagination.page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeList {
    pub data: Vec<Trade>,
    pub meta: ListMeta,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn positive(raw: &Option<String>, name: &str, default: i64) -> AppResult<i64> {
    match non_empty(raw) {
        None => Ok(default),
        Some(s) => match s.parse::<i64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(AppError::Validation(format!("{} must be a positive integer", name))),
        },
    }
}

fn parse_bound(raw: &str, end_of_range: bool) -> AppResult<i64> {
    // A bare date as the upper bound covers that whole day
    if end_of_range {
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok((midnight_utc(date) + Duration::days(1)).timestamp() - 1);
        }
    }
    parse_timestamp(raw)
        .map(|dt| dt.timestamp())
        .ok_or_else(|| AppError::Validation(format!("Invalid date filter: {}", raw)))
}

fn parse_bound_date(raw: &str) -> AppResult<NaiveDate> {
    parse_timestamp(raw)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| AppError::Validation(format!("Invalid date filter: {}", raw)))
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
