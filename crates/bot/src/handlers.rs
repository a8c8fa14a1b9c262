//! Update dispatch: authorization, intent routing, party resolution and
//! the two-step payment flow.
//!
//! [`BotContext::handle_update`] never returns an error. Every failure path
//! either produces a Spanish reply for the user or is logged and swallowed,
//! because the webhook must acknowledge Telegram no matter what happened
//! here (a non-200 would make Telegram redeliver the same update forever).

use std::sync::Arc;

use chrono::Utc;
use ledger::{
    Authorization, Counterparty, Expense, ExpenseView, Ledger, LedgerError, NewExpense,
    PartyMatch, Settlement, User,
};

use crate::extract::{ExpenseIntent, Extractor, IntentAction};
use crate::routing::{self, Intent};
use crate::telegram::{CallbackQuery, Message, Sender, Update};
use crate::ui;

const CALLBACK_PAY_PREFIX: &str = "pay_debt_";

const MSG_NOT_AUTHORIZED: &str = "❌ No estás autorizado para usar este bot.";
const MSG_NOT_REGISTERED: &str = "❌ No estás registrado. Usa /start para registrarte.";
const MSG_EXTRACTION_FAILED: &str = "❌ No pude procesar tu mensaje. Por favor, intenta de nuevo con un formato claro.\n\nEjemplo: 'Gasté 50000 en el supermercado'";
const MSG_EXPENSE_NEEDS_MENTION: &str = "❌ Para registrar un gasto compartido, debes mencionar con quién gastaste.\n\nEjemplo: 'Gasté 50000 con María en el supermercado'";
const MSG_ONLY_ONE_USER: &str =
    "⚠️ Solo hay un usuario registrado. Necesitas registrar otro usuario primero.";
const MSG_ONLY_ONE_USER_TIP: &str = "⚠️ Solo hay un usuario registrado. Necesitas registrar otro usuario primero.\n\n💡 Tip: Puedes especificar a quién le debes en tu mensaje.\nEjemplo: 'Le debo 50000 a María'";
const MSG_INTERNAL_ERROR: &str =
    "❌ Ocurrió un error al procesar tu mensaje. Por favor, intenta de nuevo más tarde.";

const ADMIN_USAGE: &str = "❌ Uso: /admin <comando>\n\nComandos disponibles:\n/admin add <telegram_id> <nombre>\n/admin list\n/admin authorize <telegram_id>\n/admin deauthorize <telegram_id>";
const MSG_ADMIN_BAD_ID: &str = "❌ El telegram_id debe ser un número.";
const MSG_ADMIN_UNKNOWN: &str = "❌ Comando no reconocido. Usa /admin list para ver ayuda.";

/// Shared state for one bot instance: the ledger plus the two outward seams.
#[derive(Clone)]
pub struct BotContext {
    ledger: Ledger,
    transport: Arc<dyn crate::telegram::ChatTransport>,
    extractor: Arc<dyn Extractor>,
}

impl BotContext {
    pub fn new(
        ledger: Ledger,
        transport: Arc<dyn crate::telegram::ChatTransport>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            ledger,
            transport,
            extractor,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Processes one Telegram update end to end.
    ///
    /// Callback queries are dispatched before messages so button clicks are
    /// never mistaken for text. Updates without a usable sender are dropped
    /// silently.
    pub async fn handle_update(&self, update: Update) {
        if let Some(callback) = update.callback_query {
            if let Err(err) = self.handle_callback(&callback).await {
                tracing::error!(%err, callback_id = %callback.id, "callback handling failed");
                self.transport
                    .answer_callback(&callback.id, "❌ Error al procesar la solicitud.", true)
                    .await;
            }
            return;
        }

        let Some(message) = update.message else {
            return;
        };
        let Some(sender) = message.from.clone() else {
            tracing::warn!(message_id = message.message_id, "message without sender");
            return;
        };
        let chat_id = message.chat.id;

        if let Err(err) = self.handle_message(&sender, chat_id, &message).await {
            tracing::error!(%err, chat_id, "message handling failed");
            self.transport
                .send_message(chat_id, MSG_INTERNAL_ERROR, None)
                .await;
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Messages
    // ───────────────────────────────────────────────────────────────────

    async fn handle_message(
        &self,
        sender: &Sender,
        chat_id: i64,
        message: &Message,
    ) -> Result<(), LedgerError> {
        let text = message.text.as_deref().unwrap_or("");

        if !text.is_empty() {
            match routing::route(text) {
                Intent::Start => return self.handle_start(sender, chat_id).await,
                Intent::Admin => return self.handle_admin(chat_id, text).await,
                Intent::ListExpenses => {
                    let Some(user) = self.authorized_user(sender.id, chat_id).await? else {
                        return Ok(());
                    };
                    return self.handle_list(chat_id, &user).await;
                }
                Intent::PayDebts => {
                    let Some(user) = self.authorized_user(sender.id, chat_id).await? else {
                        return Ok(());
                    };
                    return self.handle_pay(chat_id, &user).await;
                }
                Intent::CollectDebts => {
                    let Some(user) = self.authorized_user(sender.id, chat_id).await? else {
                        return Ok(());
                    };
                    return self.handle_collect(chat_id, &user).await;
                }
                Intent::FreeText => {}
            }
        }

        let Some(user) = self.authorized_user(sender.id, chat_id).await? else {
            return Ok(());
        };
        if text.is_empty() {
            // Stickers, photos and other non-text content are ignored.
            return Ok(());
        }
        self.handle_extraction(chat_id, &user, text).await
    }

    /// Sends the matching rejection and returns `None` unless the sender is
    /// registered and authorized.
    async fn authorized_user(
        &self,
        telegram_id: i64,
        chat_id: i64,
    ) -> Result<Option<User>, LedgerError> {
        match self.ledger.authorization(telegram_id).await? {
            Authorization::Granted(user) => Ok(Some(user)),
            Authorization::Revoked(_) => {
                self.transport
                    .send_message(chat_id, MSG_NOT_AUTHORIZED, None)
                    .await;
                Ok(None)
            }
            Authorization::Unknown => {
                self.transport
                    .send_message(chat_id, MSG_NOT_REGISTERED, None)
                    .await;
                Ok(None)
            }
        }
    }

    async fn handle_start(&self, sender: &Sender, chat_id: i64) -> Result<(), LedgerError> {
        if let Some(existing) = self.ledger.user_by_telegram_id(sender.id).await? {
            let reply = format!(
                "👋 ¡Hola {}! Ya estás registrado.\n\n\
                 Envía un mensaje con un gasto para registrarlo.\n\
                 Ejemplo: 'Gasté 50000 en el supermercado'",
                existing.name
            );
            self.transport.send_message(chat_id, &reply, None).await;
            return Ok(());
        }

        let user = self
            .ledger
            .register_user(sender.id, &sender.display_name())
            .await?;
        let reply = format!(
            "✅ ¡Bienvenido {}!\n\n\
             Ya estás registrado en el bot. Puedes empezar a registrar gastos.\n\n\
             Ejemplo: 'Gasté 50000 en el supermercado'",
            user.name
        );
        self.transport.send_message(chat_id, &reply, None).await;
        Ok(())
    }

    async fn handle_admin(&self, chat_id: i64, text: &str) -> Result<(), LedgerError> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let Some(command) = parts.get(1).map(|c| c.to_lowercase()) else {
            self.transport.send_message(chat_id, ADMIN_USAGE, None).await;
            return Ok(());
        };

        match command.as_str() {
            "add" if parts.len() >= 4 => {
                let Ok(new_telegram_id) = parts[2].parse::<i64>() else {
                    self.transport
                        .send_message(chat_id, MSG_ADMIN_BAD_ID, None)
                        .await;
                    return Ok(());
                };
                let name = parts[3..].join(" ");
                if self
                    .ledger
                    .user_by_telegram_id(new_telegram_id)
                    .await?
                    .is_some()
                {
                    let reply = format!(
                        "❌ El usuario con telegram_id {new_telegram_id} ya existe."
                    );
                    self.transport.send_message(chat_id, &reply, None).await;
                } else {
                    let user = self.ledger.register_user(new_telegram_id, &name).await?;
                    let reply = format!(
                        "✅ Usuario agregado: {} (ID: {})",
                        user.name, user.telegram_id
                    );
                    self.transport.send_message(chat_id, &reply, None).await;
                }
            }
            "list" => {
                let users = self.ledger.all_users().await?;
                if users.is_empty() {
                    self.transport
                        .send_message(chat_id, "📋 No hay usuarios registrados.", None)
                        .await;
                } else {
                    let mut reply = "📋 <b>Usuarios registrados:</b>\n\n".to_string();
                    for user in users {
                        let status = if user.is_authorized {
                            "✅ Autorizado"
                        } else {
                            "❌ No autorizado"
                        };
                        reply.push_str(&format!(
                            "• {} (ID: {}) - {status}\n",
                            user.name, user.telegram_id
                        ));
                    }
                    self.transport.send_message(chat_id, &reply, None).await;
                }
            }
            "authorize" if parts.len() >= 3 => {
                self.handle_set_authorized(chat_id, parts[2], true).await?;
            }
            "deauthorize" if parts.len() >= 3 => {
                self.handle_set_authorized(chat_id, parts[2], false).await?;
            }
            _ => {
                self.transport
                    .send_message(chat_id, MSG_ADMIN_UNKNOWN, None)
                    .await;
            }
        }
        Ok(())
    }

    async fn handle_set_authorized(
        &self,
        chat_id: i64,
        raw_id: &str,
        authorized: bool,
    ) -> Result<(), LedgerError> {
        let Ok(target) = raw_id.parse::<i64>() else {
            self.transport
                .send_message(chat_id, MSG_ADMIN_BAD_ID, None)
                .await;
            return Ok(());
        };
        let reply = match self.ledger.set_authorized(target, authorized).await? {
            Some(user) if authorized => format!("✅ Usuario {} autorizado.", user.name),
            Some(user) => format!("❌ Usuario {} desautorizado.", user.name),
            None => format!("❌ Usuario con telegram_id {target} no encontrado."),
        };
        self.transport.send_message(chat_id, &reply, None).await;
        Ok(())
    }

    async fn handle_list(&self, chat_id: i64, user: &User) -> Result<(), LedgerError> {
        let (to_pay, to_collect) = self.ledger.open_expenses(user.id).await?;
        let summary = ui::expenses_summary(user, &to_pay, &to_collect, Utc::now().date_naive());
        self.transport.send_message(chat_id, &summary, None).await;
        Ok(())
    }

    async fn handle_pay(&self, chat_id: i64, user: &User) -> Result<(), LedgerError> {
        let debts = self.ledger.debts_to_pay(user.id).await?;
        let (text, markup) = ui::debts_for_payment(&debts, Utc::now().date_naive());
        self.transport.send_message(chat_id, &text, markup).await;
        Ok(())
    }

    async fn handle_collect(&self, chat_id: i64, user: &User) -> Result<(), LedgerError> {
        let debts = self.ledger.debts_to_collect(user.id).await?;
        let text = ui::debts_to_collect(&debts, Utc::now().date_naive());
        self.transport.send_message(chat_id, &text, None).await;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Free text
    // ───────────────────────────────────────────────────────────────────

    async fn handle_extraction(
        &self,
        chat_id: i64,
        user: &User,
        text: &str,
    ) -> Result<(), LedgerError> {
        let intent = match self.extractor.extract(text).await {
            Ok(intent) => intent,
            Err(err) => {
                tracing::warn!(%err, user_id = user.id, "extraction failed");
                self.transport
                    .send_message(chat_id, MSG_EXTRACTION_FAILED, None)
                    .await;
                return Ok(());
            }
        };

        let Some((payer, debtor)) = self.resolve_parties(chat_id, user, &intent).await? else {
            return Ok(());
        };

        let expense = self
            .ledger
            .create_expense(NewExpense {
                description: intent.description,
                amount: intent.amount,
                currency: intent.currency,
                payer_id: payer.id,
                debtor_id: debtor.id,
                raw_text: Some(text.to_string()),
                category: intent.category,
                due_date: intent.due_date,
            })
            .await?;
        tracing::info!(
            expense_id = expense.id,
            payer_id = payer.id,
            debtor_id = debtor.id,
            "expense registered"
        );

        let view = ExpenseView {
            expense,
            payer_name: payer.name,
            debtor_name: debtor.name,
        };
        let confirmation = ui::expense_confirmation(&view, Utc::now().date_naive());
        self.transport
            .send_message(chat_id, &confirmation, None)
            .await;
        Ok(())
    }

    /// Decides who pays and who owes for an extracted intent.
    ///
    /// "Gasté" makes the sender the payer and requires a mentioned
    /// counterparty; "debo" makes the sender the debtor and, when nobody
    /// is mentioned, falls back to the sole other registered user. With
    /// several candidates the sender is asked to name one. Every failure
    /// sends its reply here and yields `None`.
    async fn resolve_parties(
        &self,
        chat_id: i64,
        user: &User,
        intent: &ExpenseIntent,
    ) -> Result<Option<(User, User)>, LedgerError> {
        match intent.action {
            IntentAction::Expense => {
                let Some(name) = intent.mentioned_name.as_deref() else {
                    self.transport
                        .send_message(chat_id, MSG_EXPENSE_NEEDS_MENTION, None)
                        .await;
                    return Ok(None);
                };
                match self.ledger.resolve_party(user.id, name).await? {
                    PartyMatch::Found(other) => Ok(Some((user.clone(), other))),
                    PartyMatch::NotFound { others } => {
                        let reply = ui::unknown_party(name, &others, |first| {
                            format!("Gasté 50000 con {first} en el supermercado")
                        });
                        self.transport.send_message(chat_id, &reply, None).await;
                        Ok(None)
                    }
                    PartyMatch::NoOthers => {
                        self.transport
                            .send_message(chat_id, MSG_ONLY_ONE_USER, None)
                            .await;
                        Ok(None)
                    }
                }
            }
            IntentAction::Debt => match intent.mentioned_name.as_deref() {
                Some(name) => match self.ledger.resolve_party(user.id, name).await? {
                    PartyMatch::Found(other) => Ok(Some((other, user.clone()))),
                    PartyMatch::NotFound { others } => {
                        let reply = ui::unknown_party(name, &others, |first| {
                            format!("Le debo 50000 a {first}")
                        });
                        self.transport.send_message(chat_id, &reply, None).await;
                        Ok(None)
                    }
                    PartyMatch::NoOthers => {
                        self.transport
                            .send_message(chat_id, MSG_ONLY_ONE_USER, None)
                            .await;
                        Ok(None)
                    }
                },
                None => match self.ledger.default_counterparty(user.id).await? {
                    Counterparty::Sole(other) => Ok(Some((other, user.clone()))),
                    Counterparty::Ambiguous(others) => {
                        let reply = ui::ambiguous_counterparty(&others);
                        self.transport.send_message(chat_id, &reply, None).await;
                        Ok(None)
                    }
                    Counterparty::NoOthers => {
                        self.transport
                            .send_message(chat_id, MSG_ONLY_ONE_USER_TIP, None)
                            .await;
                        Ok(None)
                    }
                },
            },
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Callbacks
    // ───────────────────────────────────────────────────────────────────

    async fn handle_callback(&self, callback: &CallbackQuery) -> Result<(), LedgerError> {
        let user = match self.ledger.authorization(callback.from.id).await? {
            Authorization::Granted(user) => user,
            Authorization::Revoked(_) | Authorization::Unknown => {
                self.transport
                    .answer_callback(&callback.id, "❌ No estás autorizado.", true)
                    .await;
                return Ok(());
            }
        };

        let Some(data) = callback.data.as_deref().filter(|d| !d.is_empty()) else {
            self.transport
                .answer_callback(&callback.id, "❌ Error: callback sin datos.", true)
                .await;
            return Ok(());
        };

        let Some(raw_id) = data.strip_prefix(CALLBACK_PAY_PREFIX) else {
            self.transport
                .answer_callback(&callback.id, "❌ Tipo de callback desconocido.", true)
                .await;
            return Ok(());
        };
        let Ok(debt_id) = raw_id.parse::<i32>() else {
            self.transport
                .answer_callback(&callback.id, "❌ ID de deuda inválido.", true)
                .await;
            return Ok(());
        };

        // Re-validate against the current row: the button may be minutes old.
        match self.ledger.expense(debt_id).await? {
            None => {
                self.transport
                    .answer_callback(&callback.id, "❌ Deuda no encontrada.", true)
                    .await;
                return Ok(());
            }
            Some(Expense { debtor_id, .. }) if debtor_id != user.id => {
                self.transport
                    .answer_callback(&callback.id, "❌ Esta deuda no te pertenece.", true)
                    .await;
                return Ok(());
            }
            Some(Expense {
                is_settled: true, ..
            }) => {
                self.transport
                    .answer_callback(&callback.id, "✅ Esta deuda ya está pagada.", true)
                    .await;
                return Ok(());
            }
            Some(_) => {}
        }

        let view = match self.ledger.mark_paid(debt_id).await? {
            Settlement::Settled(view) => view,
            Settlement::AlreadySettled => {
                // Lost the race to another click between the check and the flip.
                self.transport
                    .answer_callback(&callback.id, "✅ Esta deuda ya está pagada.", true)
                    .await;
                return Ok(());
            }
            Settlement::NotFound => {
                self.transport
                    .answer_callback(&callback.id, "❌ Deuda no encontrada.", true)
                    .await;
                return Ok(());
            }
        };

        let ack = format!(
            "✅ Deuda pagada: {} {}",
            view.expense.amount, view.expense.currency
        );
        self.transport.answer_callback(&callback.id, &ack, false).await;

        let Some((chat_id, message_id)) = callback
            .message
            .as_ref()
            .map(|message| (message.chat.id, message.message_id))
        else {
            tracing::warn!(debt_id, "callback without message, skipping receipt");
            return Ok(());
        };

        let receipt = ui::payment_receipt(&view, Utc::now());
        self.transport.send_message(chat_id, &receipt, None).await;

        let remaining = self.ledger.debts_to_pay(user.id).await?;
        if remaining.is_empty() {
            self.transport
                .edit_message_text(chat_id, message_id, &ui::no_debts_left(), None)
                .await;
        } else {
            let (text, markup) = ui::remaining_debts(&remaining, Utc::now().date_naive());
            self.transport
                .edit_message_text(chat_id, message_id, &text, markup)
                .await;
        }
        Ok(())
    }
}
