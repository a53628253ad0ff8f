use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;

use super::ImportError;

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xls", "xlsb", "ods"];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Header row plus data rows, every cell as trimmed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn is_spreadsheet(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| SPREADSHEET_EXTENSIONS.contains(&ext.as_str()))
}

/// Parses an uploaded file. The format is picked from the file name.
pub fn read_file(file_name: &str, bytes: &[u8]) -> Result<RawTable, ImportError> {
    if is_spreadsheet(file_name) {
        log::debug!("Reading {} as a spreadsheet", file_name);
        read_spreadsheet(bytes)
    } else {
        log::debug!("Reading {} as delimited text", file_name);
        read_delimited(&decode_text(bytes))
    }
}

/// UTF-8 with an optional BOM; anything else is taken as Latin-1, which is
/// what spreadsheet tools commonly emit for Portuguese headers.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            log::warn!("Upload is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

/// Picks `;` or tab only when strictly more frequent on the first line than
/// both alternatives; comma otherwise.
pub fn detect_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    let commas = first_line.matches(',').count();
    let semicolons = first_line.matches(';').count();
    let tabs = first_line.matches('\t').count();

    let delimiter = if semicolons > commas && semicolons > tabs {
        b';'
    } else if tabs > commas && tabs > semicolons {
        b'\t'
    } else {
        b','
    };

    log::debug!(
        "Delimiter counts on first line: comma={} semicolon={} tab={} -> {:?}",
        commas,
        semicolons,
        tabs,
        delimiter as char
    );

    delimiter
}

pub fn read_delimited(text: &str) -> Result<RawTable, ImportError> {
    let delimiter = detect_delimiter(text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records: Vec<Vec<String>> = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row: Vec<String> = record.iter().map(str::to_string).collect();
        if row.iter().any(|cell| !cell.is_empty()) {
            records.push(row);
        }
    }

    if records.len() < 2 {
        return Err(ImportError::EmptyCsv);
    }

    let headers = records.remove(0);
    Ok(RawTable {
        headers,
        rows: records,
    })
}

/// First sheet only.
pub fn read_spreadsheet(bytes: &[u8]) -> Result<RawTable, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Spreadsheet(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ImportError::EmptySpreadsheet)?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ImportError::Spreadsheet(format!("failed to read sheet '{}': {}", sheet_name, e)))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or(ImportError::EmptySpreadsheet)?
        .iter()
        .map(cell_to_string)
        .collect();

    let data: Vec<Vec<String>> = rows
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect();

    if data.is_empty() {
        return Err(ImportError::EmptySpreadsheet);
    }

    Ok(RawTable {
        headers,
        rows: data,
    })
}

/// Text a spreadsheet would show for the cell; dates become `YYYY-MM-DD`.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_delimiters() {
        assert_eq!(detect_delimiter("idu,data,ativo"), b',');
        assert_eq!(detect_delimiter("idu;data;ativo\n1,2,3,4,5"), b';');
        assert_eq!(detect_delimiter("idu\tdata\tativo"), b'\t');
        // Ties fall back to comma
        assert_eq!(detect_delimiter("a;b,c"), b',');
        assert_eq!(detect_delimiter(""), b',');
    }

    #[test]
    fn test_reads_semicolon_file_with_quoted_decimal_commas() {
        let text = "IDU;Data;Ativo;Direcao;Percentual;Alvo\r\n\
                    T1;15/01/2024;BTC;long;\"2,5%\";1\r\n\
                    \r\n\
                    T2; 16/01/2024 ;ETH;SHORT;\"-0,8\";\r\n";

        let table = read_delimited(text).unwrap();
        assert_eq!(table.headers, vec!["IDU", "Data", "Ativo", "Direcao", "Percentual", "Alvo"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][4], "2,5%");
        assert_eq!(table.rows[1][1], "16/01/2024");
        assert_eq!(table.rows[1][5], "");
    }

    #[test]
    fn test_comma_file_with_quoted_commas() {
        let text = "idu,ativo,percentual\nA1,\"BTC, perp\",\"1,5\"\n";
        let table = read_delimited(text).unwrap();
        assert_eq!(table.rows[0], vec!["A1", "BTC, perp", "1,5"]);
    }

    #[test]
    fn test_short_rows_are_kept() {
        let table = read_delimited("a,b,c\n1,2\n").unwrap();
        assert_eq!(table.rows[0], vec!["1", "2"]);
    }

    #[test]
    fn test_header_only_csv_is_rejected() {
        assert!(matches!(read_delimited("idu,data\n"), Err(ImportError::EmptyCsv)));
        assert!(matches!(read_delimited("idu,data\n , \n"), Err(ImportError::EmptyCsv)));
        assert!(matches!(read_delimited(""), Err(ImportError::EmptyCsv)));
    }

    #[test]
    fn test_decode_strips_bom_and_falls_back_to_latin1() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("idu,variação\n".as_bytes());
        assert_eq!(decode_text(&bytes), "idu,variação\n");

        // "variação" in Latin-1
        let latin1 = b"varia\xe7\xe3o";
        assert_eq!(decode_text(latin1), "variação");
    }

    #[test]
    fn test_read_file_dispatches_on_extension() {
        assert!(is_spreadsheet("Trades.XLSX"));
        assert!(is_spreadsheet("old.xls"));
        assert!(!is_spreadsheet("trades.csv"));
        assert!(!is_spreadsheet("xlsx"));

        let table = read_file("trades.csv", b"idu,ativo\nA1,BTC\n").unwrap();
        assert_eq!(table.rows.len(), 1);

        let err = read_file("trades.xlsx", b"definitely not a zip").unwrap_err();
        assert!(matches!(err, ImportError::Spreadsheet(_)));
    }

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(&Data::Float(45000.0)), "45000");
        assert_eq!(cell_to_string(&Data::Float(0.05)), "0.05");
        assert_eq!(cell_to_string(&Data::Int(-3)), "-3");
        assert_eq!(cell_to_string(&Data::String("  BTC ".to_string())), "BTC");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::Bool(true)), "true");
    }

    const TRADES_XLSX: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/trades.xlsx"));
    const HEADERS_ONLY_XLSX: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/headers_only.xlsx"));

    #[test]
    fn test_reads_first_sheet_of_workbook() {
        let table = read_file("trades.xlsx", TRADES_XLSX).unwrap();

        assert_eq!(table.headers, vec!["IDU", "Data", "Ativo", "Direção", "Percentual", "Alvo"]);
        // The blank third row is dropped and the second sheet is never read
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["X-1", "2024-01-15", "BTC", "LONG", "2.5", "3"]);
        assert_eq!(table.rows[1], vec!["X-2", "16/01/2024", "ETH", "short", "0.05", ""]);
    }

    #[test]
    fn test_header_only_workbook_is_rejected() {
        let err = read_file("empty.xlsx", HEADERS_ONLY_XLSX).unwrap_err();
        assert!(matches!(err, ImportError::EmptySpreadsheet));
        assert_eq!(err.to_string(), "the spreadsheet has no data");
    }
}
