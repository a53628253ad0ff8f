use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{map_unique_violation, AppError, AppResult};
use crate::models::{
    from_unix, ListMeta, ListParams, ListQuery, NewTrade, Trade, TradeFilters, TradeInput,
    TradeList, UpdateTradeInput,
};
use crate::AppState;

const TRADE_COLUMNS: &str =
    "id, idu, data, ativo, direcao, percentual, alvo, created_at, updated_at";

/// Helper function to map a database row to a Trade struct
fn map_row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        idu: row.get(1)?,
        date: from_unix(row.get(2)?)?,
        asset: row.get(3)?,
        direction: row.get(4)?,
        percentage: row.get(5)?,
        target: row.get(6)?,
        created_at: from_unix(row.get(7)?)?,
        updated_at: from_unix(row.get(8)?)?,
    })
}

pub fn fetch_trade(conn: &Connection, id: i64) -> rusqlite::Result<Option<Trade>> {
    conn.query_row(
        &format!("SELECT {} FROM trades WHERE id = ?", TRADE_COLUMNS),
        [id],
        map_row_to_trade,
    )
    .optional()
}

pub fn find_trade_id_by_idu(conn: &Connection, idu: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row("SELECT id FROM trades WHERE idu = ?", [idu], |row| row.get(0))
        .optional()
}

/// Every trade matching `filters`, in the given `ORDER BY` order.
pub fn fetch_trades(
    conn: &Connection,
    filters: &TradeFilters,
    order_by: &str,
) -> rusqlite::Result<Vec<Trade>> {
    let (where_clause, params) = filters.where_clause();
    let query = format!(
        "SELECT {} FROM trades{} ORDER BY {}",
        TRADE_COLUMNS, where_clause, order_by
    );

    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query)?;
    let trades = stmt.query_map(param_refs.as_slice(), map_row_to_trade)?;
    trades.collect()
}

pub fn count_trades(conn: &Connection, filters: &TradeFilters) -> rusqlite::Result<i64> {
    let (where_clause, params) = filters.where_clause();
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    conn.query_row(
        &format!("SELECT COUNT(*) FROM trades{}", where_clause),
        param_refs.as_slice(),
        |row| row.get(0),
    )
}

/// One page (or everything) of the filtered, sorted listing.
pub fn query_trade_list(conn: &Connection, query: &ListQuery) -> rusqlite::Result<TradeList> {
    let total = count_trades(conn, &query.filters)?;

    let (where_clause, mut params) = query.filters.where_clause();
    let direction = query.order.keyword();
    // id breaks ties so pages never overlap
    let mut sql = format!(
        "SELECT {} FROM trades{} ORDER BY {} {}, id {}",
        TRADE_COLUMNS,
        where_clause,
        query.sort.column(),
        direction,
        direction
    );

    if let Some(pagination) = query.pagination {
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(Box::new(pagination.limit));
        params.push(Box::new(pagination.offset()));
    }

    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let data = stmt
        .query_map(param_refs.as_slice(), map_row_to_trade)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let meta = match query.pagination {
        Some(pagination) => ListMeta::paged(pagination, total),
        None => ListMeta::All { total },
    };

    Ok(TradeList { data, meta })
}

pub fn insert_trade(conn: &Connection, trade: &NewTrade, now: DateTime<Utc>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO trades (idu, data, ativo, direcao, percentual, alvo, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            trade.idu,
            trade.date.timestamp(),
            trade.asset,
            trade.direction,
            trade.percentage,
            trade.target,
            now.timestamp(),
            now.timestamp()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrites every editable field. Returns the number of rows touched.
pub fn update_trade_row(
    conn: &Connection,
    id: i64,
    trade: &NewTrade,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE trades
         SET idu = ?, data = ?, ativo = ?, direcao = ?, percentual = ?, alvo = ?, updated_at = ?
         WHERE id = ?",
        params![
            trade.idu,
            trade.date.timestamp(),
            trade.asset,
            trade.direction,
            trade.percentage,
            trade.target,
            now.timestamp(),
            id
        ],
    )
}

fn parse_id(raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::Validation("Invalid ID format".to_string()))
}

fn not_found() -> AppError {
    AppError::NotFound("Trade not found".to_string())
}

pub async fn list_trades(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> AppResult<Json<TradeList>> {
    let Query(params) = params?;
    let query = params.to_list_query()?;

    let list = state
        .db
        .run(move |conn| Ok(query_trade_list(conn, &query)?))
        .await?;
    Ok(Json(list))
}

pub async fn get_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Trade>> {
    let id = parse_id(&id)?;

    state
        .db
        .run(move |conn| fetch_trade(conn, id)?.ok_or_else(not_found))
        .await
        .map(Json)
}

pub async fn create_trade(
    State(state): State<AppState>,
    payload: Result<Json<TradeInput>, JsonRejection>,
) -> AppResult<Json<Trade>> {
    let Json(input) = payload?;
    let trade = input.validate()?;

    state
        .db
        .run(move |conn| {
            if find_trade_id_by_idu(conn, &trade.idu)?.is_some() {
                return Err(AppError::Duplicate(
                    "Trade with this IDU already exists".to_string(),
                ));
            }

            let id = insert_trade(conn, &trade, Utc::now())
                .map_err(|e| map_unique_violation(e, &trade.idu))?;
            log::info!("Created trade {} ({})", id, trade.idu);

            fetch_trade(conn, id)?
                .ok_or_else(|| AppError::Internal(format!("trade {} vanished after insert", id)))
        })
        .await
        .map(Json)
}

pub async fn update_trade(
    State(state): State<AppState>,
    payload: Result<Json<UpdateTradeInput>, JsonRejection>,
) -> AppResult<Json<Trade>> {
    let Json(input) = payload?;
    let id = input.id;
    let trade = input.fields.validate()?;

    state
        .db
        .run(move |conn| {
            if let Some(other) = find_trade_id_by_idu(conn, &trade.idu)? {
                if other != id {
                    return Err(AppError::Duplicate(format!(
                        "Trade with IDU {} already exists",
                        trade.idu
                    )));
                }
            }

            let updated = update_trade_row(conn, id, &trade, Utc::now())
                .map_err(|e| map_unique_violation(e, &trade.idu))?;
            if updated == 0 {
                return Err(not_found());
            }
            log::info!("Updated trade {} ({})", id, trade.idu);

            fetch_trade(conn, id)?.ok_or_else(not_found)
        })
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub id: Option<String>,
}

pub async fn delete_trade(
    State(state): State<AppState>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(params) = params?;
    let raw = params
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("ID is required".to_string()))?;
    let id = parse_id(&raw)?;

    let deleted = state
        .db
        .run(move |conn| Ok(conn.execute("DELETE FROM trades WHERE id = ?", [id])?))
        .await?;
    if deleted == 0 {
        return Err(not_found());
    }
    log::info!("Deleted trade {}", id);

    Ok(Json(json!({ "message": "Trade deleted successfully" })))
}
