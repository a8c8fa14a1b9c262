//! End-to-end handler tests over an in-memory database, with the Telegram
//! transport and the extractor replaced by canned implementations.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bot::BotContext;
use bot::extract::{ExpenseIntent, ExtractError, Extractor, IntentAction};
use bot::telegram::{
    CallbackQuery, Chat, ChatTransport, InlineKeyboardMarkup, Message, Sender, Update,
};
use ledger::{Ledger, Money, User};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(i64, String, Option<InlineKeyboardMarkup>)>>,
    edited: Mutex<Vec<(i64, i64, String, Option<InlineKeyboardMarkup>)>>,
    acks: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingTransport {
    fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text, _)| text.clone())
            .collect()
    }

    fn last_sent(&self) -> (i64, String, Option<InlineKeyboardMarkup>) {
        self.sent.lock().unwrap().last().cloned().unwrap()
    }

    fn last_edit(&self) -> (i64, i64, String, Option<InlineKeyboardMarkup>) {
        self.edited.lock().unwrap().last().cloned().unwrap()
    }

    fn last_ack(&self) -> (String, String, bool) {
        self.acks.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), reply_markup));
        true
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> bool {
        self.edited
            .lock()
            .unwrap()
            .push((chat_id, message_id, text.to_string(), reply_markup));
        true
    }

    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: &str,
        show_alert: bool,
    ) -> bool {
        self.acks.lock().unwrap().push((
            callback_query_id.to_string(),
            text.to_string(),
            show_alert,
        ));
        true
    }
}

struct FixedExtractor {
    intent: Option<ExpenseIntent>,
}

#[async_trait]
impl Extractor for FixedExtractor {
    async fn extract(&self, _text: &str) -> Result<ExpenseIntent, ExtractError> {
        self.intent
            .clone()
            .ok_or_else(|| ExtractError::MalformedResponse("no candidates".to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn context_with(intent: Option<ExpenseIntent>) -> (BotContext, Arc<RecordingTransport>) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let context = BotContext::new(
        Ledger::new(db),
        transport.clone(),
        Arc::new(FixedExtractor { intent }),
    );
    (context, transport)
}

fn sender(id: i64) -> Sender {
    Sender {
        id,
        first_name: Some("Pedro".to_string()),
        last_name: None,
        username: None,
    }
}

fn text_update(sender_id: i64, text: &str) -> Update {
    Update {
        update_id: Some(1),
        message: Some(Message {
            message_id: 10,
            from: Some(sender(sender_id)),
            chat: Chat { id: sender_id },
            text: Some(text.to_string()),
        }),
        callback_query: None,
    }
}

fn callback_update(sender_id: i64, data: &str) -> Update {
    Update {
        update_id: Some(2),
        message: None,
        callback_query: Some(CallbackQuery {
            id: "cb1".to_string(),
            from: sender(sender_id),
            message: Some(Message {
                message_id: 77,
                from: None,
                chat: Chat { id: sender_id },
                text: None,
            }),
            data: Some(data.to_string()),
        }),
    }
}

fn intent(amount_major: i64, action: IntentAction, mentioned: Option<&str>) -> ExpenseIntent {
    ExpenseIntent {
        amount: Money::new(amount_major * 100),
        currency: "COP".to_string(),
        description: "supermercado".to_string(),
        category: None,
        action,
        mentioned_name: mentioned.map(String::from),
        due_date: None,
    }
}

async fn register_pair(context: &BotContext) -> (User, User) {
    let pedro = context.ledger().register_user(100, "Pedro").await.unwrap();
    let maria = context.ledger().register_user(200, "María").await.unwrap();
    (pedro, maria)
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration and authorization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_registers_and_welcomes() {
    let (context, transport) = context_with(None).await;
    context.handle_update(text_update(100, "/start")).await;

    let (chat_id, text, _) = transport.last_sent();
    assert_eq!(chat_id, 100);
    assert!(text.contains("✅ ¡Bienvenido Pedro!"));

    let user = context.ledger().user_by_telegram_id(100).await.unwrap();
    assert!(user.unwrap().is_authorized);
}

#[tokio::test]
async fn start_twice_greets_instead_of_reregistering() {
    let (context, transport) = context_with(None).await;
    context.handle_update(text_update(100, "/start")).await;
    context.handle_update(text_update(100, "/start")).await;

    let (_, text, _) = transport.last_sent();
    assert!(text.contains("👋 ¡Hola Pedro! Ya estás registrado."));
    assert_eq!(context.ledger().all_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unregistered_sender_is_prompted_to_start() {
    let (context, transport) = context_with(None).await;
    context.handle_update(text_update(100, "resumen")).await;

    let (_, text, _) = transport.last_sent();
    assert_eq!(text, "❌ No estás registrado. Usa /start para registrarte.");
}

#[tokio::test]
async fn revoked_user_is_rejected() {
    let (context, transport) = context_with(None).await;
    register_pair(&context).await;
    context.ledger().set_authorized(100, false).await.unwrap();

    context.handle_update(text_update(100, "resumen")).await;

    let (_, text, _) = transport.last_sent();
    assert_eq!(text, "❌ No estás autorizado para usar este bot.");
}

#[tokio::test]
async fn admin_list_shows_authorization_status() {
    let (context, transport) = context_with(None).await;
    register_pair(&context).await;
    context.ledger().set_authorized(200, false).await.unwrap();

    context.handle_update(text_update(100, "/admin list")).await;

    let (_, text, _) = transport.last_sent();
    assert!(text.contains("• Pedro (ID: 100) - ✅ Autorizado"));
    assert!(text.contains("• María (ID: 200) - ❌ No autorizado"));
}

#[tokio::test]
async fn admin_add_registers_new_user() {
    let (context, transport) = context_with(None).await;
    context
        .handle_update(text_update(100, "/admin add 300 Ana María"))
        .await;

    let (_, text, _) = transport.last_sent();
    assert_eq!(text, "✅ Usuario agregado: Ana María (ID: 300)");
    assert!(
        context
            .ledger()
            .user_by_telegram_id(300)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn admin_rejects_non_numeric_id() {
    let (context, transport) = context_with(None).await;
    context
        .handle_update(text_update(100, "/admin authorize pedro"))
        .await;

    let (_, text, _) = transport.last_sent();
    assert_eq!(text, "❌ El telegram_id debe ser un número.");
}

// ─────────────────────────────────────────────────────────────────────────────
// Free-text registration
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn expense_with_mention_makes_sender_the_payer() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Expense, Some("maría")))).await;
    let (pedro, maria) = register_pair(&context).await;

    context
        .handle_update(text_update(100, "Gasté 50000 con María en el supermercado"))
        .await;

    let debts = context.ledger().debts_to_pay(maria.id).await.unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].expense.payer_id, pedro.id);
    assert_eq!(debts[0].expense.amount, Money::new(5_000_000));
    assert_eq!(
        debts[0].expense.raw_text.as_deref(),
        Some("Gasté 50000 con María en el supermercado")
    );

    let (_, text, _) = transport.last_sent();
    assert!(text.contains("✅ <b>Gasto registrado</b>"));
    assert!(text.contains("👤 Pagó: Pedro"));
    assert!(text.contains("💳 Debe: María"));
}

#[tokio::test]
async fn debt_without_mention_falls_back_to_other_user() {
    let (context, transport) = context_with(Some(intent(30_000, IntentAction::Debt, None))).await;
    let (pedro, maria) = register_pair(&context).await;

    context.handle_update(text_update(100, "Debo 30000")).await;

    let debts = context.ledger().debts_to_pay(pedro.id).await.unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].expense.payer_id, maria.id);

    let (_, text, _) = transport.last_sent();
    assert!(text.contains("👤 Pagó: María"));
}

#[tokio::test]
async fn debt_without_mention_is_ambiguous_with_several_users() {
    let (context, transport) = context_with(Some(intent(10_000, IntentAction::Debt, None))).await;
    let (pedro, maria) = register_pair(&context).await;
    let juan = context.ledger().register_user(300, "Juan").await.unwrap();

    context.handle_update(text_update(100, "Debo 10000")).await;

    // No arbitrary counterparty may be picked.
    assert!(context.ledger().debts_to_pay(pedro.id).await.unwrap().is_empty());
    assert!(context.ledger().debts_to_collect(maria.id).await.unwrap().is_empty());
    assert!(context.ledger().debts_to_collect(juan.id).await.unwrap().is_empty());

    let (_, text, _) = transport.last_sent();
    assert!(text.contains("Debes mencionar a quién le debes."));
    assert!(text.contains("Usuarios disponibles: María, Juan"));
}

#[tokio::test]
async fn unknown_party_creates_nothing_and_lists_roster() {
    let (context, transport) =
        context_with(Some(intent(10_000, IntentAction::Expense, Some("Carlos")))).await;
    let (pedro, maria) = register_pair(&context).await;

    context
        .handle_update(text_update(100, "Gasté 10000 con Carlos"))
        .await;

    assert!(context.ledger().debts_to_pay(maria.id).await.unwrap().is_empty());
    assert!(context.ledger().debts_to_collect(pedro.id).await.unwrap().is_empty());

    let (_, text, _) = transport.last_sent();
    assert!(text.contains("❌ No encontré un usuario llamado 'Carlos'."));
    assert!(text.contains("Usuarios disponibles: María"));
}

#[tokio::test]
async fn sender_cannot_be_their_own_counterparty() {
    let (context, transport) =
        context_with(Some(intent(10_000, IntentAction::Expense, Some("Pedro")))).await;
    register_pair(&context).await;

    context
        .handle_update(text_update(100, "Gasté 10000 con Pedro"))
        .await;

    let (_, text, _) = transport.last_sent();
    assert!(text.contains("❌ No encontré un usuario llamado 'Pedro'."));
}

#[tokio::test]
async fn expense_without_mention_gets_format_hint() {
    let (context, transport) =
        context_with(Some(intent(10_000, IntentAction::Expense, None))).await;
    register_pair(&context).await;

    context.handle_update(text_update(100, "Gasté 10000")).await;

    let (_, text, _) = transport.last_sent();
    assert!(text.starts_with("❌ Para registrar un gasto compartido"));
}

#[tokio::test]
async fn lone_user_debt_gets_tip() {
    let (context, transport) = context_with(Some(intent(10_000, IntentAction::Debt, None))).await;
    context.ledger().register_user(100, "Pedro").await.unwrap();

    context.handle_update(text_update(100, "Debo 10000")).await;

    let (_, text, _) = transport.last_sent();
    assert!(text.starts_with("⚠️ Solo hay un usuario registrado."));
    assert!(text.contains("💡 Tip"));
}

#[tokio::test]
async fn extraction_failure_sends_format_example() {
    let (context, transport) = context_with(None).await;
    register_pair(&context).await;

    context.handle_update(text_update(100, "asdf qwerty")).await;

    let (_, text, _) = transport.last_sent();
    assert!(text.starts_with("❌ No pude procesar tu mensaje."));
    assert!(text.contains("Ejemplo: 'Gasté 50000 en el supermercado'"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment flow
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pay_keyword_lists_debts_with_buttons() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Debt, Some("María")))).await;
    register_pair(&context).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;

    context.handle_update(text_update(100, "pagar")).await;

    let (_, text, markup) = transport.last_sent();
    assert!(text.starts_with("💳 <b>Deudas Pendientes"));
    let markup = markup.unwrap();
    assert_eq!(markup.inline_keyboard.len(), 1);
    assert!(markup.inline_keyboard[0][0]
        .callback_data
        .starts_with("pay_debt_"));
}

#[tokio::test]
async fn settling_last_debt_edits_menu_to_congratulations() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Debt, Some("María")))).await;
    let (pedro, _) = register_pair(&context).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;

    let debts = context.ledger().debts_to_pay(pedro.id).await.unwrap();
    let debt_id = debts[0].expense.id;

    context
        .handle_update(callback_update(100, &format!("pay_debt_{debt_id}")))
        .await;

    let (_, ack, alert) = transport.last_ack();
    assert_eq!(ack, "✅ Deuda pagada: 50000.00 COP");
    assert!(!alert);

    let (_, receipt, _) = transport.last_sent();
    assert!(receipt.contains("🧾 <b>COMPROBANTE DE PAGO</b>"));
    assert!(receipt.contains("👤 <b>Pagado a:</b> María"));
    assert!(receipt.contains("💳 <b>Pagado por:</b> Pedro"));

    let (chat_id, message_id, edit, markup) = transport.last_edit();
    assert_eq!((chat_id, message_id), (100, 77));
    assert!(edit.contains("✅ <b>¡Felicidades!</b>"));
    assert!(markup.is_none());

    assert!(context.ledger().debts_to_pay(pedro.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn settling_one_of_two_debts_edits_menu_to_remaining_list() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Debt, Some("María")))).await;
    let (pedro, _) = register_pair(&context).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;

    let debts = context.ledger().debts_to_pay(pedro.id).await.unwrap();
    let first_id = debts[0].expense.id;

    context
        .handle_update(callback_update(100, &format!("pay_debt_{first_id}")))
        .await;

    let (_, _, edit, markup) = transport.last_edit();
    assert!(edit.contains("💳 <b>Deudas Pendientes Restantes</b>"));
    assert!(edit.contains("📊 Total de deudas: 1"));
    assert!(edit.contains("• 50,000.00 COP"));
    assert_eq!(markup.unwrap().inline_keyboard.len(), 1);
}

#[tokio::test]
async fn second_click_on_settled_debt_is_a_noop() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Debt, Some("María")))).await;
    let (pedro, _) = register_pair(&context).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;

    let debts = context.ledger().debts_to_pay(pedro.id).await.unwrap();
    let debt_id = debts[0].expense.id;
    let data = format!("pay_debt_{debt_id}");

    context.handle_update(callback_update(100, &data)).await;
    let edits_after_first = transport.edited.lock().unwrap().len();

    context.handle_update(callback_update(100, &data)).await;

    let (_, ack, alert) = transport.last_ack();
    assert_eq!(ack, "✅ Esta deuda ya está pagada.");
    assert!(alert);
    assert_eq!(transport.edited.lock().unwrap().len(), edits_after_first);
}

#[tokio::test]
async fn paying_someone_elses_debt_is_rejected() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Debt, Some("María")))).await;
    let (pedro, _) = register_pair(&context).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;

    let debts = context.ledger().debts_to_pay(pedro.id).await.unwrap();
    let debt_id = debts[0].expense.id;

    // María clicks a button for Pedro's debt.
    context
        .handle_update(callback_update(200, &format!("pay_debt_{debt_id}")))
        .await;

    let (_, ack, _) = transport.last_ack();
    assert_eq!(ack, "❌ Esta deuda no te pertenece.");
    assert!(!context.ledger().debts_to_pay(pedro.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_callback_tokens_are_answered() {
    let (context, transport) = context_with(None).await;
    register_pair(&context).await;

    context.handle_update(callback_update(100, "pay_debt_abc")).await;
    assert_eq!(transport.last_ack().1, "❌ ID de deuda inválido.");

    context.handle_update(callback_update(100, "noop_42")).await;
    assert_eq!(transport.last_ack().1, "❌ Tipo de callback desconocido.");

    context.handle_update(callback_update(100, "pay_debt_9999")).await;
    assert_eq!(transport.last_ack().1, "❌ Deuda no encontrada.");
}

#[tokio::test]
async fn unauthorized_callback_is_rejected() {
    let (context, transport) = context_with(None).await;
    context.handle_update(callback_update(100, "pay_debt_1")).await;

    let (_, ack, alert) = transport.last_ack();
    assert_eq!(ack, "❌ No estás autorizado.");
    assert!(alert);
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary and collection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn summary_covers_both_directions() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Debt, Some("María")))).await;
    register_pair(&context).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;

    context.handle_update(text_update(100, "resumen")).await;
    let (_, text, _) = transport.last_sent();
    assert!(text.contains("📊 <b>Resumen de Gastos - Pedro</b>"));
    assert!(text.contains("💳 <b>Debes Pagar:</b>"));
    assert!(text.contains("• Debes: 50000.00 COP"));

    // The same expense from María's side.
    context.handle_update(text_update(200, "resumen")).await;
    let (_, text, _) = transport.last_sent();
    assert!(text.contains("📊 <b>Resumen de Gastos - María</b>"));
    assert!(text.contains("• Te deben: 50000.00 COP"));
}

#[tokio::test]
async fn collect_keyword_lists_who_owes() {
    let (context, transport) =
        context_with(Some(intent(50_000, IntentAction::Debt, Some("María")))).await;
    register_pair(&context).await;
    context.handle_update(text_update(100, "Le debo 50000 a María")).await;

    context.handle_update(text_update(200, "quién me debe")).await;

    let (_, text, _) = transport.last_sent();
    assert!(text.starts_with("💰 <b>Quién te debe:</b>"));
    assert!(text.contains("Pedro te debe"));
    assert!(text.contains("<b>💰 Total a cobrar:</b>"));
}

#[tokio::test]
async fn collect_with_nothing_open_says_so() {
    let (context, transport) = context_with(None).await;
    register_pair(&context).await;

    context.handle_update(text_update(100, "cobrar")).await;

    let (_, text, _) = transport.last_sent();
    assert_eq!(text, "✅ No tienes deudas pendientes por cobrar.");
}

#[tokio::test]
async fn messages_without_sender_are_dropped() {
    let (context, transport) = context_with(None).await;
    let update = Update {
        update_id: Some(3),
        message: Some(Message {
            message_id: 5,
            from: None,
            chat: Chat { id: 100 },
            text: Some("hola".to_string()),
        }),
        callback_query: None,
    };
    context.handle_update(update).await;
    assert!(transport.sent_texts().is_empty());
}
