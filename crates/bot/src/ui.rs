//! Spanish HTML message formatting.
//!
//! Every formatter is a pure function over ledger views plus the current
//! date, so they are testable without a database or a clock.

use chrono::{DateTime, NaiveDate, Utc};
use ledger::{DueStatus, ExpenseView, Money, User, due_status};

use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup};

const BUTTON_DESCRIPTION_LIMIT: usize = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Due date tags
// ─────────────────────────────────────────────────────────────────────────────

fn due_tag(due: Option<NaiveDate>, today: NaiveDate) -> String {
    let Some(date) = due else {
        return String::new();
    };
    match due_status(due, today) {
        DueStatus::Overdue => format!(" ⚠️ Vencida ({})", date.format("%d/%m/%Y")),
        DueStatus::DueToday => " 🔴 Vence hoy".to_string(),
        DueStatus::Upcoming => format!(" 📅 {}", date.format("%d/%m/%Y")),
        DueStatus::None => String::new(),
    }
}

fn summary_due_tag(due: Option<NaiveDate>, today: NaiveDate) -> String {
    let Some(date) = due else {
        return String::new();
    };
    let formatted = date.format("%d/%m/%Y");
    match due_status(due, today) {
        DueStatus::Overdue => format!(" | 📅 {formatted} ⚠️ Vencida"),
        DueStatus::DueToday => format!(" | 📅 {formatted} 🔴 Vence hoy"),
        DueStatus::Upcoming => format!(" | 📅 {formatted}"),
        DueStatus::None => String::new(),
    }
}

/// Per-currency totals in first-seen order.
fn totals_by_currency(views: &[ExpenseView]) -> Vec<(String, Money)> {
    let mut totals: Vec<(String, Money)> = Vec::new();
    for view in views {
        let expense = &view.expense;
        match totals.iter_mut().find(|(code, _)| *code == expense.currency) {
            Some(entry) => {
                entry.1 = Money::new(entry.1.minor().saturating_add(expense.amount.minor()));
            }
            None => totals.push((expense.currency.clone(), expense.amount)),
        }
    }
    totals
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration and settlement messages
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn expense_confirmation(view: &ExpenseView, today: NaiveDate) -> String {
    let expense = &view.expense;
    let mut message = format!(
        "✅ <b>Gasto registrado</b>\n\n\
         💰 Monto: {} {}\n\
         📝 Descripción: {}\n\
         👤 Pagó: {}\n\
         💳 Debe: {}\n",
        expense.amount, expense.currency, expense.description, view.payer_name, view.debtor_name,
    );

    if let Some(category) = &expense.category {
        message.push_str(&format!("🏷️ Categoría: {category}\n"));
    }

    if let Some(date) = expense.due_date {
        let formatted = date.format("%d/%m/%Y");
        let tag = match due_status(expense.due_date, today) {
            DueStatus::Overdue => " ⚠️ Vencida",
            DueStatus::DueToday => " 🔴 Vence hoy",
            _ => "",
        };
        message.push_str(&format!("📅 Fecha: {formatted}{tag}\n"));
    }

    message
}

pub(crate) fn payment_receipt(view: &ExpenseView, paid_at: DateTime<Utc>) -> String {
    let expense = &view.expense;
    let mut message = format!(
        "🧾 <b>COMPROBANTE DE PAGO</b>\n\n\
         ━━━━━━━━━━━━━━━━━━━━━━━━\n\
         💰 <b>Monto Pagado:</b> {} {}\n\
         📝 <b>Concepto:</b> {}\n\
         👤 <b>Pagado a:</b> {}\n\
         💳 <b>Pagado por:</b> {}\n",
        expense.amount, expense.currency, expense.description, view.payer_name, view.debtor_name,
    );

    if let Some(category) = &expense.category {
        message.push_str(&format!("🏷️ <b>Categoría:</b> {category}\n"));
    }
    if let Some(date) = expense.due_date {
        message.push_str(&format!(
            "📅 <b>Fecha de Vencimiento:</b> {}\n",
            date.format("%d/%m/%Y")
        ));
    }

    message.push_str(&format!(
        "🕐 <b>Fecha de Pago:</b> {}\n\
         ━━━━━━━━━━━━━━━━━━━━━━━━\n\n\
         ✅ <b>Estado:</b> PAGADO",
        paid_at.format("%d/%m/%Y %H:%M:%S")
    ));

    message
}

// ─────────────────────────────────────────────────────────────────────────────
// Debt lists
// ─────────────────────────────────────────────────────────────────────────────

const PAY_LIST_HEADER: &str = "💳 <b>Deudas Pendientes - Selecciona una para pagar:</b>\n\n";

fn debt_entries_with_buttons(
    debts: &[ExpenseView],
    today: NaiveDate,
) -> (String, InlineKeyboardMarkup) {
    let mut body = String::new();
    let mut rows = Vec::with_capacity(debts.len());

    for (idx, view) in debts.iter().enumerate() {
        let idx = idx + 1;
        let expense = &view.expense;
        body.push_str(&format!(
            "<b>{idx}.</b> {} {} - {}\n   👤 A: {}{}\n\n",
            expense.amount,
            expense.currency,
            expense.description,
            view.payer_name,
            due_tag(expense.due_date, today),
        ));

        let mut short: String = expense
            .description
            .chars()
            .take(BUTTON_DESCRIPTION_LIMIT)
            .collect();
        if expense.description.chars().count() > BUTTON_DESCRIPTION_LIMIT {
            short.push_str("...");
        }
        rows.push(vec![InlineKeyboardButton {
            text: format!("{idx}. {} {} - {short}", expense.amount, expense.currency),
            callback_data: format!("pay_debt_{}", expense.id),
        }]);
    }

    (body, InlineKeyboardMarkup { inline_keyboard: rows })
}

/// The pay menu: a numbered list with one settle button per debt.
pub(crate) fn debts_for_payment(
    debts: &[ExpenseView],
    today: NaiveDate,
) -> (String, Option<InlineKeyboardMarkup>) {
    if debts.is_empty() {
        return (
            "✅ No tienes deudas pendientes para pagar.".to_string(),
            None,
        );
    }
    let (body, markup) = debt_entries_with_buttons(debts, today);
    (format!("{PAY_LIST_HEADER}{body}"), Some(markup))
}

/// Replacement text for the pay menu after one debt was settled.
pub(crate) fn remaining_debts(
    debts: &[ExpenseView],
    today: NaiveDate,
) -> (String, Option<InlineKeyboardMarkup>) {
    let mut message = format!(
        "💳 <b>Deudas Pendientes Restantes</b>\n\n📊 Total de deudas: {}\n\n",
        debts.len()
    );

    let totals = totals_by_currency(debts);
    if !totals.is_empty() {
        message.push_str("<b>💰 Total a pagar:</b>\n");
        for (currency, total) in &totals {
            message.push_str(&format!("• {} {currency}\n", total.grouped()));
        }
        message.push('\n');
    }

    let (body, markup) = debt_entries_with_buttons(debts, today);
    message.push_str(&body);
    (message, Some(markup))
}

pub(crate) fn no_debts_left() -> String {
    "✅ <b>¡Felicidades!</b>\n\n\
     🎉 No tienes más deudas pendientes.\n\
     Todas tus deudas han sido saldadas."
        .to_string()
}

pub(crate) fn debts_to_collect(debts: &[ExpenseView], today: NaiveDate) -> String {
    if debts.is_empty() {
        return "✅ No tienes deudas pendientes por cobrar.".to_string();
    }

    let mut message = "💰 <b>Quién te debe:</b>\n\n".to_string();
    for (idx, view) in debts.iter().enumerate() {
        let expense = &view.expense;
        message.push_str(&format!(
            "<b>{}.</b> {} te debe\n   💰 {} {}\n   📝 {}{}\n\n",
            idx + 1,
            view.debtor_name,
            expense.amount,
            expense.currency,
            expense.description,
            due_tag(expense.due_date, today),
        ));
    }

    let totals = totals_by_currency(debts);
    if !totals.is_empty() {
        message.push_str("\n<b>💰 Total a cobrar:</b>\n");
        for (currency, total) in &totals {
            message.push_str(&format!("• {} {currency}\n", total.grouped()));
        }
    }

    message
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn expenses_summary(
    user: &User,
    to_pay: &[ExpenseView],
    to_collect: &[ExpenseView],
    today: NaiveDate,
) -> String {
    let totals_to_pay = totals_by_currency(to_pay);
    let totals_to_collect = totals_by_currency(to_collect);

    let mut message = format!("📊 <b>Resumen de Gastos - {}</b>\n\n", user.name);

    message.push_str("💳 <b>Debes Pagar:</b>\n");
    if to_pay.is_empty() {
        message.push_str("✅ No tienes deudas pendientes\n");
    } else {
        for view in to_pay {
            let expense = &view.expense;
            message.push_str(&format!(
                "• {} {} - {}\n  👤 A: {}",
                expense.amount, expense.currency, expense.description, view.payer_name,
            ));
            if let Some(category) = &expense.category {
                message.push_str(&format!(" | 🏷️ {category}"));
            }
            message.push_str(&format!(
                "{} | ⏳ Pendiente\n",
                summary_due_tag(expense.due_date, today)
            ));
        }
    }
    if !totals_to_pay.is_empty() {
        message.push_str("\n<b>Total a pagar:</b>\n");
        for (currency, total) in &totals_to_pay {
            message.push_str(&format!("• {total} {currency}\n"));
        }
    }

    message.push('\n');

    message.push_str("💰 <b>Debes Cobrar:</b>\n");
    if to_collect.is_empty() {
        message.push_str("ℹ️ No tienes gastos por cobrar\n");
    } else {
        for view in to_collect {
            let expense = &view.expense;
            message.push_str(&format!(
                "• {} {} - {}\n  👤 De: {}",
                expense.amount, expense.currency, expense.description, view.debtor_name,
            ));
            if let Some(category) = &expense.category {
                message.push_str(&format!(" | 🏷️ {category}"));
            }
            message.push_str(&format!(
                "{} | ⏳ Pendiente\n",
                summary_due_tag(expense.due_date, today)
            ));
        }
    }
    if !totals_to_collect.is_empty() {
        message.push_str("\n<b>Total a cobrar:</b>\n");
        for (currency, total) in &totals_to_collect {
            message.push_str(&format!("• {total} {currency}\n"));
        }
    }

    // Net balance per currency: collect-side currencies first, then any
    // currency that only appears on the pay side.
    let mut currencies: Vec<&str> = totals_to_collect.iter().map(|(c, _)| c.as_str()).collect();
    for (currency, _) in &totals_to_pay {
        if !currencies.contains(&currency.as_str()) {
            currencies.push(currency);
        }
    }
    if !currencies.is_empty() {
        message.push_str("\n<b>Balance Neto:</b>\n");
        for currency in currencies {
            let collect = lookup(&totals_to_collect, currency);
            let pay = lookup(&totals_to_pay, currency);
            let net = collect.minor() - pay.minor();
            if net > 0 {
                message.push_str(&format!("• Te deben: {} {currency}\n", Money::new(net)));
            } else if net < 0 {
                message.push_str(&format!("• Debes: {} {currency}\n", Money::new(-net)));
            } else {
                message.push_str(&format!("• {currency}: En equilibrio\n"));
            }
        }
    }

    message
}

fn lookup(totals: &[(String, Money)], currency: &str) -> Money {
    totals
        .iter()
        .find(|(code, _)| code == currency)
        .map(|(_, total)| *total)
        .unwrap_or(Money::ZERO)
}

// ─────────────────────────────────────────────────────────────────────────────
// Error replies
// ─────────────────────────────────────────────────────────────────────────────

/// Reply when a mentioned name resolves to nobody: shows the roster and a
/// corrected example built from the first registered user.
pub(crate) fn unknown_party(fragment: &str, others: &[User], example: fn(&str) -> String) -> String {
    let names: Vec<&str> = others.iter().map(|user| user.name.as_str()).collect();
    let first = names.first().copied().unwrap_or("María");
    format!(
        "❌ No encontré un usuario llamado '{fragment}'.\n\n\
         Usuarios disponibles: {}\n\n\
         Por favor, verifica el nombre e intenta de nuevo.\n\
         Ejemplo: '{}'",
        names.join(", "),
        example(first),
    )
}

/// Reply when a debt mentions nobody and more than one counterparty is
/// registered, so no default can be picked.
pub(crate) fn ambiguous_counterparty(others: &[User]) -> String {
    let names: Vec<&str> = others.iter().map(|user| user.name.as_str()).collect();
    let first = names.first().copied().unwrap_or("María");
    format!(
        "❌ Hay varios usuarios registrados. Debes mencionar a quién le debes.\n\n\
         Usuarios disponibles: {}\n\n\
         Ejemplo: 'Le debo 50000 a {first}'",
        names.join(", "),
    )
}
