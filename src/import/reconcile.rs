use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use crate::commands::trades::{find_trade_id_by_idu, insert_trade, update_trade_row};
use crate::error::{map_unique_violation, AppResult};
use crate::models::NewTrade;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportLogEntry {
    #[serde(rename = "type")]
    pub action: ImportAction,
    pub idu: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub log: Vec<ImportLogEntry>,
}

/// Writes `trades` in a single transaction. A trade whose IDU is already
/// stored (including by an earlier row of the same batch) is updated in
/// place; everything else is inserted.
pub fn apply_import(conn: &Connection, trades: &[NewTrade]) -> AppResult<ImportReport> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now();
    let mut report = ImportReport::default();

    for trade in trades {
        match find_trade_id_by_idu(&tx, &trade.idu)? {
            Some(id) => {
                update_trade_row(&tx, id, trade, now)?;
                report.updated += 1;
                report.log.push(ImportLogEntry {
                    action: ImportAction::Update,
                    idu: trade.idu.clone(),
                    message: format!(
                        "Updated trade {}: {} {} {}% on {}",
                        trade.idu,
                        trade.asset,
                        trade.direction,
                        trade.percentage,
                        trade.date.format("%Y-%m-%d")
                    ),
                });
            }
            None => {
                insert_trade(&tx, trade, now).map_err(|e| map_unique_violation(e, &trade.idu))?;
                report.created += 1;
                report.log.push(ImportLogEntry {
                    action: ImportAction::Create,
                    idu: trade.idu.clone(),
                    message: format!(
                        "Created trade {}: {} {} {}% on {}",
                        trade.idu,
                        trade.asset,
                        trade.direction,
                        trade.percentage,
                        trade.date.format("%Y-%m-%d")
                    ),
                });
            }
        }
    }

    tx.commit()?;
    log::info!(
        "Import committed: {} created, {} updated",
        report.created,
        report.updated
    );

    Ok(report)
}
