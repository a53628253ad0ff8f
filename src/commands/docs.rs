use axum::extract::State;
use axum::Json;
use serde::{Serialize, Serializer};

use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct ParameterDoc {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointDoc {
    pub path: &'static str,
    pub method: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterDoc>,
    /// Field name to description, serialised as a JSON object.
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "body_as_object")]
    pub body: Vec<(&'static str, &'static str)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

fn body_as_object<S: Serializer>(body: &[(&'static str, &'static str)], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(body.iter().copied())
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiDocs {
    pub name: &'static str,
    pub version: &'static str,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    pub endpoints: Vec<EndpointDoc>,
}

fn param(name: &'static str, kind: &'static str, description: &'static str) -> ParameterDoc {
    ParameterDoc {
        name,
        kind,
        description,
        default: None,
        required: false,
    }
}

impl ParameterDoc {
    fn default_value(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

fn filter_params() -> Vec<ParameterDoc> {
    vec![
        param("ativo", "string", "Filter by asset (substring)"),
        param("direcao", "string", "Filter by direction (LONG or SHORT)"),
        param("dataInicio", "date", "Trades on or after this date (YYYY-MM-DD)"),
        param("dataFim", "date", "Trades up to the end of this date (YYYY-MM-DD)"),
    ]
}

const TRADE_BODY: [(&str, &str); 6] = [
    ("idu", "string (required, unique)"),
    ("data", "string (required, ISO 8601 or YYYY-MM-DD)"),
    ("ativo", "string (required)"),
    ("direcao", "string (required, LONG or SHORT)"),
    ("percentual", "number or numeric string (required)"),
    ("alvo", "number (optional, defaults to 0)"),
];

pub fn api_docs(base_url: &str) -> ApiDocs {
    let mut list_params = vec![
        param("all", "boolean", "When true, return every trade without pagination").default_value("false"),
        param("page", "number", "Page number, starting at 1").default_value("1"),
        param("limit", "number", "Trades per page").default_value("50"),
        param("idu", "string", "Filter by IDU (substring)"),
    ];
    list_params.extend(filter_params());
    list_params.push(param("orderBy", "string", "Sort field").default_value("createdAt"));
    list_params.push(param("order", "string", "Sort direction (asc or desc)").default_value("desc"));

    let mut update_body = vec![("id", "number (required)")];
    update_body.extend(TRADE_BODY);

    let endpoints = vec![
        EndpointDoc {
            path: "/trades",
            method: "GET",
            description: "List trades with filters, sorting and pagination",
            parameters: list_params,
            body: Vec::new(),
            example: Some(format!(
                "{}/trades?page=1&limit=10&ativo=BTC&direcao=LONG&orderBy=data&order=desc",
                base_url
            )),
        },
        EndpointDoc {
            path: "/trades/:id",
            method: "GET",
            description: "Fetch a single trade by id",
            parameters: vec![param("id", "number", "Trade id").required()],
            body: Vec::new(),
            example: Some(format!("{}/trades/1", base_url)),
        },
        EndpointDoc {
            path: "/trades/month",
            method: "GET",
            description: "Trades grouped by calendar month with per-month summaries",
            parameters: Vec::new(),
            body: Vec::new(),
            example: Some(format!("{}/trades/month", base_url)),
        },
        EndpointDoc {
            path: "/trades/stats",
            method: "GET",
            description: "Aggregate statistics over the filtered trades",
            parameters: filter_params(),
            body: Vec::new(),
            example: Some(format!("{}/trades/stats?ativo=BTC&dataInicio=2023-01-01", base_url)),
        },
        EndpointDoc {
            path: "/trades",
            method: "POST",
            description: "Create a trade",
            parameters: Vec::new(),
            body: TRADE_BODY.to_vec(),
            example: None,
        },
        EndpointDoc {
            path: "/trades",
            method: "PUT",
            description: "Replace the fields of an existing trade",
            parameters: Vec::new(),
            body: update_body,
            example: None,
        },
        EndpointDoc {
            path: "/trades",
            method: "DELETE",
            description: "Delete a trade",
            parameters: vec![param("id", "number", "Id of the trade to delete").required()],
            body: Vec::new(),
            example: Some(format!("{}/trades?id=1", base_url)),
        },
        EndpointDoc {
            path: "/imports",
            method: "POST",
            description: "Upload a CSV or spreadsheet (multipart field `file`) and get a preview with a suggested column mapping",
            parameters: Vec::new(),
            body: vec![
                ("file", "file (required, .csv/.txt/.xlsx/.xls/.ods)"),
                ("fileName", "string (optional, overrides the uploaded name)"),
            ],
            example: None,
        },
        EndpointDoc {
            path: "/imports/:id",
            method: "GET",
            description: "Show the preview of a pending import",
            parameters: vec![param("id", "uuid", "Import id returned by the upload").required()],
            body: Vec::new(),
            example: None,
        },
        EndpointDoc {
            path: "/imports/:id/commit",
            method: "POST",
            description: "Write a pending import: existing IDUs are updated, the rest created",
            parameters: vec![param("id", "uuid", "Import id returned by the upload").required()],
            body: vec![
                ("mapping", "object (optional, field -> header; defaults to the suggested mapping)"),
                ("percentualMode", "string (optional, auto | raw | multiply)"),
            ],
            example: None,
        },
        EndpointDoc {
            path: "/imports/:id",
            method: "DELETE",
            description: "Discard a pending import",
            parameters: vec![param("id", "uuid", "Import id returned by the upload").required()],
            body: Vec::new(),
            example: None,
        },
    ];

    ApiDocs {
        name: "Trade Ledger API",
        version: env!("CARGO_PKG_VERSION"),
        base_url: base_url.to_string(),
        endpoints,
    }
}

pub async fn get_docs(State(state): State<AppState>) -> Json<ApiDocs> {
    Json(api_docs(&state.config.public_url))
}
