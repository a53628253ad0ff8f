use serde::{Deserialize, Serialize};

use super::ImportError;

/// Trade fields an import column can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Idu,
    Date,
    Asset,
    Direction,
    Percentage,
    Target,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Idu,
        Field::Date,
        Field::Asset,
        Field::Direction,
        Field::Percentage,
        Field::Target,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Idu => "idu",
            Field::Date => "data",
            Field::Asset => "ativo",
            Field::Direction => "direcao",
            Field::Percentage => "percentual",
            Field::Target => "alvo",
        }
    }

    /// Lower-case header fragments that identify the field.
    fn variations(&self) -> &'static [&'static str] {
        match self {
            Field::Idu => &["idu", "id", "identificador", "identifier"],
            Field::Date => &["data", "date", "data operacao", "operation date"],
            Field::Asset => &["ativo", "symbol", "par", "pair", "asset"],
            Field::Direction => &["direcao", "direction", "dir", "tipo", "type"],
            Field::Percentage => &["percentual", "percentage", "perc", "variação", "variation"],
            Field::Target => &["alvo", "target", "objetivo", "goal"],
        }
    }
}

/// Which file header feeds each field. Empty strings count as unmapped so
/// clients can send back the form they edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub idu: Option<String>,
    pub data: Option<String>,
    pub ativo: Option<String>,
    pub direcao: Option<String>,
    pub percentual: Option<String>,
    pub alvo: Option<String>,
}

/// Column index of every field, checked against the file headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMapping {
    pub idu: usize,
    pub date: usize,
    pub asset: usize,
    pub direction: usize,
    pub percentage: usize,
    pub target: usize,
}

impl ColumnMapping {
    pub fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Idu => &self.idu,
            Field::Date => &self.data,
            Field::Asset => &self.ativo,
            Field::Direction => &self.direcao,
            Field::Percentage => &self.percentual,
            Field::Target => &self.alvo,
        };
        value.as_deref().filter(|header| !header.trim().is_empty())
    }

    fn set(&mut self, field: Field, header: &str) {
        let slot = match field {
            Field::Idu => &mut self.idu,
            Field::Date => &mut self.data,
            Field::Asset => &mut self.ativo,
            Field::Direction => &mut self.direcao,
            Field::Percentage => &mut self.percentual,
            Field::Target => &mut self.alvo,
        };
        *slot = Some(header.to_string());
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        Field::ALL
            .iter()
            .filter(|field| self.get(**field).is_none())
            .map(Field::name)
            .collect()
    }

    pub fn resolve(&self, headers: &[String]) -> Result<ResolvedMapping, ImportError> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(ImportError::MissingMapping(missing));
        }

        let index_of = |field: Field| -> Result<usize, ImportError> {
            let column = self.get(field).unwrap_or_default();
            headers
                .iter()
                .position(|header| header == column)
                .ok_or_else(|| ImportError::UnknownColumn {
                    column: column.to_string(),
                    available: headers.to_vec(),
                })
        };

        Ok(ResolvedMapping {
            idu: index_of(Field::Idu)?,
            date: index_of(Field::Date)?,
            asset: index_of(Field::Asset)?,
            direction: index_of(Field::Direction)?,
            percentage: index_of(Field::Percentage)?,
            target: index_of(Field::Target)?,
        })
    }
}

/// Guesses the mapping from header names.
///
/// Headers are visited left to right and every field with a matching
/// variation takes the header, so a later match overrides an earlier one.
pub fn auto_map(headers: &[String]) -> ColumnMapping {
    let mut mapping = ColumnMapping::default();

    for header in headers {
        let lower = header.to_lowercase();
        for field in Field::ALL {
            if field.variations().iter().any(|variation| lower.contains(variation)) {
                mapping.set(field, header);
            }
        }
    }

    mapping
}
