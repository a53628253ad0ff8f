use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rusqlite::{Connection, ToSql};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::commands::trades::fetch_trades;
use crate::error::{AppError, AppResult};
use crate::models::{midnight_utc, Direction, ListParams, Trade, TradeFilters};
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct Period {
    #[serde(rename = "mes")]
    pub month: u32,
    #[serde(rename = "ano")]
    pub year: i32,
    #[serde(rename = "inicio")]
    pub start: DateTime<Utc>,
    /// Midnight of the last day of the month.
    #[serde(rename = "fim")]
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonthTotals {
    #[serde(rename = "totalTrades")]
    pub total_trades: i64,
    #[serde(rename = "tradesLong")]
    pub long_trades: i64,
    #[serde(rename = "tradesShort")]
    pub short_trades: i64,
    #[serde(rename = "mediaPercentual")]
    pub avg_percentage: f64,
    #[serde(rename = "mediaAlvo")]
    pub avg_target: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetCount {
    #[serde(rename = "ativo")]
    pub asset: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthSummary {
    #[serde(rename = "chave")]
    pub key: String,
    #[serde(rename = "periodo")]
    pub period: Period,
    #[serde(rename = "resumo")]
    pub totals: MonthTotals,
    #[serde(rename = "ativosMaisNegociados")]
    pub top_assets: Vec<AssetCount>,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroup {
    #[serde(rename = "ativo")]
    pub asset: String,
    #[serde(rename = "_count")]
    pub count: AssetGroupCount,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupCount {
    #[serde(rename = "ativo")]
    pub asset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionGroup {
    #[serde(rename = "direcao")]
    pub direction: Direction,
    #[serde(rename = "_count")]
    pub count: DirectionGroupCount,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionGroupCount {
    #[serde(rename = "direcao")]
    pub direction: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCount {
    #[serde(rename = "ano")]
    pub year: i32,
    #[serde(rename = "mes")]
    pub month: u32,
    #[serde(rename = "totalTrades")]
    pub total_trades: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeStats {
    #[serde(rename = "totalTrades")]
    pub total_trades: i64,
    #[serde(rename = "mediaPercentual")]
    pub avg_percentage: f64,
    #[serde(rename = "mediaAlvo")]
    pub avg_target: f64,
    #[serde(rename = "ativosMaisNegociados")]
    pub top_assets: Vec<AssetGroup>,
    #[serde(rename = "distribuicaoDirecao")]
    pub directions: Vec<DirectionGroup>,
    #[serde(rename = "estatisticasPorMes")]
    pub by_month: Vec<MonthCount>,
}

const TOP_ASSETS: usize = 5;
/// Longest month series the stats endpoint will build.
const MAX_STATS_MONTHS: i32 = 120;

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn next_month(month_start: NaiveDate) -> Option<NaiveDate> {
    month_start.checked_add_months(Months::new(1))
}

/// Inclusive unix-second bounds covering the whole calendar month.
fn month_bounds(month_start: NaiveDate) -> AppResult<(i64, i64)> {
    let next = next_month(month_start)
        .ok_or_else(|| AppError::Validation(format!("Date out of range: {}", month_start)))?;
    Ok((
        midnight_utc(month_start).timestamp(),
        midnight_utc(next).timestamp() - 1,
    ))
}

/// Every trade grouped by UTC calendar month, newest month first.
pub fn summarize_by_month(trades: &[Trade]) -> AppResult<Vec<MonthSummary>> {
    struct Bucket<'a> {
        month_start: NaiveDate,
        trades: Vec<&'a Trade>,
    }

    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();
    for trade in trades {
        let day = trade.date.date_naive();
        let key = format!("{}-{:02}", day.year(), day.month());
        buckets
            .entry(key)
            .or_insert_with(|| Bucket {
                month_start: first_of_month(day),
                trades: Vec::new(),
            })
            .trades
            .push(trade);
    }

    buckets
        .into_iter()
        .rev()
        .map(|(key, bucket)| {
            let last_day = next_month(bucket.month_start)
                .and_then(|next| next.pred_opt())
                .ok_or_else(|| AppError::Validation(format!("Date out of range: {}", key)))?;

            let count = bucket.trades.len() as i64;
            let mut totals = MonthTotals {
                total_trades: count,
                ..Default::default()
            };
            let mut asset_counts: Vec<AssetCount> = Vec::new();
            let mut asset_index: HashMap<&str, usize> = HashMap::new();
            let (mut sum_percentage, mut sum_target) = (0.0, 0.0);

            for trade in &bucket.trades {
                match trade.direction {
                    Direction::Long => totals.long_trades += 1,
                    Direction::Short => totals.short_trades += 1,
                }
                sum_percentage += trade.percentage;
                sum_target += trade.target;

                match asset_index.get(trade.asset.as_str()) {
                    Some(&i) => asset_counts[i].count += 1,
                    None => {
                        asset_index.insert(&trade.asset, asset_counts.len());
                        asset_counts.push(AssetCount {
                            asset: trade.asset.clone(),
                            count: 1,
                        });
                    }
                }
            }
            totals.avg_percentage = sum_percentage / count as f64;
            totals.avg_target = sum_target / count as f64;
            // Stable sort keeps first-seen order on ties
            asset_counts.sort_by(|a, b| b.count.cmp(&a.count));

            Ok(MonthSummary {
                key,
                period: Period {
                    month: bucket.month_start.month(),
                    year: bucket.month_start.year(),
                    start: midnight_utc(bucket.month_start),
                    end: midnight_utc(last_day),
                },
                totals,
                top_assets: asset_counts,
                trades: bucket.trades.into_iter().cloned().collect(),
            })
        })
        .collect()
}

/// Trade counts for every calendar month touched by `range`, empty months
/// included, from a single grouped query.
fn count_by_month(
    conn: &Connection,
    filters: &TradeFilters,
    range: (NaiveDate, NaiveDate),
) -> AppResult<Vec<MonthCount>> {
    let first = first_of_month(range.0);
    let last = first_of_month(range.1);
    if last < first {
        return Ok(Vec::new());
    }

    let span = (last.year() - first.year()) * 12 + last.month() as i32 - first.month() as i32 + 1;
    if span > MAX_STATS_MONTHS {
        return Err(AppError::Validation(format!(
            "Date range too large: stats cover at most {} months",
            MAX_STATS_MONTHS
        )));
    }

    let (from, _) = month_bounds(first)?;
    let (_, to) = month_bounds(last)?;
    let month_filters = TradeFilters {
        from: Some(from),
        to: Some(to),
        ..filters.clone()
    };
    let (where_clause, params) = month_filters.where_clause();
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT strftime('%Y-%m', data, 'unixepoch') AS month, COUNT(*) FROM trades{} GROUP BY month",
        where_clause
    ))?;
    let counts = stmt
        .query_map(param_refs.as_slice(), |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;

    let mut by_month = Vec::with_capacity(span as usize);
    let mut month = first;
    while month <= last {
        let key = month.format("%Y-%m").to_string();
        by_month.push(MonthCount {
            year: month.year(),
            month: month.month(),
            total_trades: counts.get(&key).copied().unwrap_or(0),
        });

        month = match next_month(month) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(by_month)
}

fn compute_trade_stats(
    conn: &Connection,
    filters: &TradeFilters,
    range: (NaiveDate, NaiveDate),
) -> AppResult<TradeStats> {
    let by_month = count_by_month(conn, filters, range)?;

    let (where_clause, params) = filters.where_clause();
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let (total_trades, avg_percentage, avg_target): (i64, Option<f64>, Option<f64>) = conn.query_row(
        &format!(
            "SELECT COUNT(*), AVG(percentual), AVG(alvo) FROM trades{}",
            where_clause
        ),
        param_refs.as_slice(),
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT ativo, COUNT(*) AS total FROM trades{} GROUP BY ativo ORDER BY total DESC, ativo ASC LIMIT {}",
        where_clause, TOP_ASSETS
    ))?;
    let top_assets = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(AssetGroup {
                asset: row.get(0)?,
                count: AssetGroupCount { asset: row.get(1)? },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT direcao, COUNT(*) FROM trades{} GROUP BY direcao ORDER BY direcao ASC",
        where_clause
    ))?;
    let directions = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(DirectionGroup {
                direction: row.get(0)?,
                count: DirectionGroupCount {
                    direction: row.get(1)?,
                },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(TradeStats {
        total_trades,
        avg_percentage: avg_percentage.unwrap_or(0.0),
        avg_target: avg_target.unwrap_or(0.0),
        top_assets,
        directions,
        by_month,
    })
}

/// Stats for `params` as seen on `today`, which anchors the default month range.
pub fn trade_stats_on(conn: &Connection, params: &ListParams, today: NaiveDate) -> AppResult<TradeStats> {
    let mut filters = params.to_filters()?;
    // Stats filter by ativo, direcao and dates only
    filters.idu = None;

    let (start, end) = params.date_range()?;
    let start = match start {
        Some(start) => start,
        None => first_of_month(today)
            .checked_sub_months(Months::new(5))
            .ok_or_else(|| AppError::Internal("default stats range out of bounds".to_string()))?,
    };
    let end = end.unwrap_or(today);

    compute_trade_stats(conn, &filters, (start, end))
}

pub async fn monthly_summary(State(state): State<AppState>) -> AppResult<Json<Vec<MonthSummary>>> {
    state
        .db
        .run(|conn| {
            let trades = fetch_trades(conn, &TradeFilters::default(), "data DESC, id DESC")?;
            summarize_by_month(&trades)
        })
        .await
        .map(Json)
}

pub async fn trade_stats(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> AppResult<Json<TradeStats>> {
    let Query(params) = params?;
    let today = Utc::now().date_naive();
    state
        .db
        .run(move |conn| trade_stats_on(conn, &params, today))
        .await
        .map(Json)
}
