//! Maps incoming message text to a handler intent.
//!
//! Routing is keyword-first: commands, then the summary / pay / collect
//! phrase lists, and only when nothing matches does the message go to the
//! model for extraction. Matching is case-insensitive substring containment,
//! checked in a fixed order so "lista de deudas pendientes" lands on the
//! summary even though it also mentions debts.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    Start,
    Admin,
    ListExpenses,
    PayDebts,
    CollectDebts,
    FreeText,
}

pub(crate) const LIST_KEYWORDS: [&str; 9] = [
    "ver mis gastos",
    "lista de deudas",
    "lista de gastos",
    "mis gastos",
    "ver gastos",
    "mostrar gastos",
    "gastos pendientes",
    "deudas pendientes",
    "resumen",
];

pub(crate) const PAY_KEYWORDS: [&str; 7] = [
    "pagar",
    "pagar deuda",
    "pagar deudas",
    "quiero pagar",
    "pago",
    "realizar pago",
    "mis deudas",
];

pub(crate) const COLLECT_KEYWORDS: [&str; 7] = [
    "quien me debe",
    "quién me debe",
    "cobrar",
    "debo cobrar",
    "me deben",
    "quien me debe dinero",
    "quién me debe dinero",
];

fn matches_any(lowered: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

#[must_use]
pub fn route(text: &str) -> Intent {
    let trimmed = text.trim();
    if trimmed.starts_with("/start") {
        return Intent::Start;
    }
    if trimmed.starts_with("/admin") {
        return Intent::Admin;
    }

    let lowered = trimmed.to_lowercase();
    if matches_any(&lowered, &LIST_KEYWORDS) {
        return Intent::ListExpenses;
    }
    if matches_any(&lowered, &PAY_KEYWORDS) {
        return Intent::PayDebts;
    }
    if matches_any(&lowered, &COLLECT_KEYWORDS) {
        return Intent::CollectDebts;
    }
    Intent::FreeText
}
