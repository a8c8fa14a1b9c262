//! Structured expense extraction from free-form Spanish text.
//!
//! The [`Extractor`] trait hides the model behind a seam so handlers can be
//! tested with a canned implementation; [`GeminiExtractor`] is the real one,
//! calling Google Gemini's `generateContent` endpoint and validating the
//! JSON it returns before anything touches the ledger.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use ledger::Money;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/";

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("model request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("invalid expense payload: {0}")]
    InvalidPayload(String),
}

/// Whether the sender paid (and is owed) or owes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    Expense,
    Debt,
}

/// A validated extraction result, ready for party resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseIntent {
    pub amount: Money,
    pub currency: String,
    pub description: String,
    pub category: Option<String>,
    pub action: IntentAction,
    /// Counterparty name as mentioned in the message, if any.
    pub mentioned_name: Option<String>,
    /// Due date as reported by the model, `YYYY-MM-DD`.
    pub due_date: Option<String>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExpenseIntent, ExtractError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw model output
// ─────────────────────────────────────────────────────────────────────────────

/// The JSON object the model is prompted to emit. Everything is optional
/// here; [`normalize`] decides what is actually required.
#[derive(Debug, Deserialize)]
struct RawIntent {
    amount: Option<f64>,
    /// Double option: the key itself is required, but a null or empty value
    /// falls back to the default currency.
    #[serde(default, deserialize_with = "some")]
    currency: Option<Option<String>>,
    description: Option<String>,
    category: Option<String>,
    action: Option<String>,
    debtor_name: Option<String>,
    due_date: Option<String>,
}

/// Wraps a present value in `Some` so an absent key (the field default,
/// `None`) stays distinguishable from an explicit `null` (`Some(None)`).
fn some<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Strips a markdown code fence if the model wrapped its JSON in one.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Validates raw model output into an [`ExpenseIntent`].
///
/// Amount, currency, description and action are required; an unknown action
/// string degrades to [`IntentAction::Debt`] with a warning rather than
/// dropping the whole message.
fn normalize(raw: RawIntent, default_currency: &str) -> Result<ExpenseIntent, ExtractError> {
    let amount = raw
        .amount
        .ok_or_else(|| ExtractError::InvalidPayload("missing amount".to_string()))?;
    let amount = Money::from_major_f64(amount)
        .filter(|amount| amount.is_positive())
        .ok_or_else(|| ExtractError::InvalidPayload(format!("invalid amount: {amount}")))?;

    let description = non_empty(raw.description)
        .ok_or_else(|| ExtractError::InvalidPayload("missing description".to_string()))?;

    let action = match raw.action.as_deref() {
        None => return Err(ExtractError::InvalidPayload("missing action".to_string())),
        Some("expense") => IntentAction::Expense,
        Some("debt") => IntentAction::Debt,
        Some(other) => {
            tracing::warn!(action = other, "unknown action from model, assuming debt");
            IntentAction::Debt
        }
    };

    let currency = raw
        .currency
        .ok_or_else(|| ExtractError::InvalidPayload("missing currency".to_string()))?;
    let currency = match non_empty(currency) {
        Some(code) => code,
        None => default_currency.to_string(),
    };

    Ok(ExpenseIntent {
        amount,
        currency,
        description,
        category: non_empty(raw.category),
        action,
        mentioned_name: non_empty(raw.debtor_name),
        due_date: non_empty(raw.due_date),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Gemini client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_k: i32,
    top_p: i32,
    max_output_tokens: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// [`Extractor`] backed by Google Gemini.
#[derive(Clone, Debug)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    default_currency: String,
}

impl GeminiExtractor {
    pub fn new(api_key: &str, model: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            default_currency: "COP".to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    #[must_use]
    pub fn with_default_currency(mut self, code: &str) -> Self {
        self.default_currency = code.to_string();
        self
    }

    fn request_body(&self, text: &str, today: NaiveDate) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(text, today, &self.default_currency),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_k: 1,
                top_p: 1,
                max_output_tokens: 1024,
            },
        }
    }
}

#[async_trait]
impl Extractor for GeminiExtractor {
    async fn extract(&self, text: &str) -> Result<ExpenseIntent, ExtractError> {
        let url = format!(
            "{}{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = self.request_body(text, Utc::now().date_naive());

        tracing::debug!(model = %self.model, text_len = text.len(), "calling gemini");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let response: GenerateResponse = response.json().await?;

        let reply = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ExtractError::MalformedResponse("no candidates".to_string()))?;

        let json = strip_fences(&reply);
        if json.is_empty() {
            return Err(ExtractError::MalformedResponse("empty reply".to_string()));
        }
        let raw: RawIntent = serde_json::from_str(json)
            .map_err(|err| ExtractError::MalformedResponse(err.to_string()))?;

        normalize(raw, &self.default_currency)
    }
}

fn build_prompt(text: &str, today: NaiveDate, default_currency: &str) -> String {
    format!(
        r#"Actúa como un extractor de entidades financieras.
Hoy es {today} (formato YYYY-MM-DD).
Analiza el texto del usuario para identificar:
- El monto del gasto (amount)
- La moneda (currency) - por defecto {default_currency} si no se especifica
- El concepto/descripción del gasto (description)
- La categoría del gasto (category) - ej: transporte, comida, servicios, etc.
- La acción (action) - puede ser "debt" (deuda) o "expense" (gasto compartido)
- El nombre de la persona mencionada (debtor_name) - Si el usuario menciona explícitamente a otra persona, extrae el nombre. Si no se menciona, usa null.
- La fecha de vencimiento (due_date) - Si el usuario menciona fechas relativas como "mañana", "ayer", "el próximo lunes", "en 3 días", calcula la fecha en formato YYYY-MM-DD. Si no se menciona, usa null.

IMPORTANTE:
- Si el usuario dice "gasté", "gastamos", "pagué", "pagamos", "compré", "compramos", la acción debe ser "expense" (gasto compartido)
- Si el usuario dice "debo", "debo pagar", "tengo que pagar", "le debo", "debo dinero", la acción debe ser "debt" (deuda)
- Para "expense" (gasté): el usuario que envía el mensaje es quien pagó, y la persona mencionada es quien debe
- Para "debt" (debo): el usuario que envía el mensaje es quien debe, y la persona mencionada es quien va a recibir el pago
- Para fechas relativas, calcula la fecha basándote en la fecha actual (hoy)
- Debes devolver SOLO un JSON válido, sin texto adicional, sin markdown, sin explicaciones.

El JSON debe tener exactamente esta estructura:
{{
    "amount": <número>,
    "currency": "<código de moneda>",
    "description": "<descripción>",
    "category": "<categoría>",
    "action": "<debt|expense>",
    "debtor_name": "<nombre de la persona mencionada o null si no se especifica>",
    "due_date": "<fecha en formato YYYY-MM-DD o null si no se especifica>"
}}

Ejemplos:
- "Gasté 50000 con María en el supermercado" -> action: "expense", currency: "COP", debtor_name: "María", due_date: null
- "Gastamos 30000 en el taxi" -> action: "expense", currency: "COP", debtor_name: null, due_date: null
- "Le debo 30000 a María por el taxi" -> action: "debt", currency: "COP", debtor_name: "María", due_date: null
- "Debo 100000 pesos a Juan mañana" -> action: "debt", currency: "COP", debtor_name: "Juan", due_date: "2024-01-16" (si hoy es 2024-01-15)
- "Tengo que pagar 50 USD el próximo lunes" -> action: "debt", currency: "USD", debtor_name: null, due_date: "2024-01-22" (calcula el próximo lunes)
- "Debo 20 dólares ayer" -> action: "debt", currency: "USD", debtor_name: null, due_date: "2024-01-14" (si hoy es 2024-01-15)

Texto del usuario: {text}

JSON:"#
    )
}
