//! Debt ledger over a shared-expense database.
//!
//! The ledger owns every read and write against the `users` and `expenses`
//! tables. Callers (the chat bot) never touch the database directly.
//!
//! There is no in-process locking: each operation is a single guarded SQL
//! statement or a short sequence of them, and the settlement flip is a
//! conditional update so concurrent payment attempts degrade to a no-op.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
pub use error::LedgerError;
pub use expenses::{DueStatus, Expense, ExpenseView, NewExpense, due_status, sort_for_display};
pub use money::Money;
use sea_orm::{ActiveValue, QueryFilter, QueryOrder, prelude::*, sea_query::Expr};
pub use users::User;

mod error;
pub mod expenses;
mod money;
mod party;
pub mod users;

type ResultLedger<T> = Result<T, LedgerError>;

/// Outcome of an authorization lookup.
///
/// The variants carry the user row whenever one exists, so callers can tell
/// "registered but revoked" apart from "never registered" without a second
/// query.
#[derive(Clone, Debug, PartialEq)]
pub enum Authorization {
    Granted(User),
    Revoked(User),
    Unknown,
}

/// Outcome of resolving a mentioned name against the roster.
#[derive(Clone, Debug, PartialEq)]
pub enum PartyMatch {
    Found(User),
    /// No user matched the fragment; `others` lists every other registered
    /// user in store order, for the error reply.
    NotFound { others: Vec<User> },
    /// The acting user is the only registered user.
    NoOthers,
}

/// Outcome of picking a counterparty when no name was mentioned.
#[derive(Clone, Debug, PartialEq)]
pub enum Counterparty {
    /// Exactly one other user is registered.
    Sole(User),
    /// More than one candidate; the sender has to name one.
    Ambiguous(Vec<User>),
    /// The acting user is the only registered user.
    NoOthers,
}

/// Outcome of a settlement attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum Settlement {
    Settled(ExpenseView),
    AlreadySettled,
    NotFound,
}

#[derive(Clone, Debug)]
pub struct Ledger {
    database: DatabaseConnection,
}

impl Ledger {
    #[must_use]
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    // ───────────────────────────────────────────────────────────────────
    // Users
    // ───────────────────────────────────────────────────────────────────

    /// Registers a new user, authorized by default.
    pub async fn register_user(&self, telegram_id: i64, name: &str) -> ResultLedger<User> {
        let model = users::ActiveModel {
            id: ActiveValue::NotSet,
            telegram_id: ActiveValue::Set(telegram_id),
            name: ActiveValue::Set(name.to_string()),
            is_authorized: ActiveValue::Set(true),
            created_at: ActiveValue::Set(Utc::now()),
        }
        .insert(&self.database)
        .await?;

        tracing::info!(telegram_id, name, "registered user");
        Ok(User::from(model))
    }

    pub async fn user_by_telegram_id(&self, telegram_id: i64) -> ResultLedger<Option<User>> {
        let model = users::Entity::find()
            .filter(users::Column::TelegramId.eq(telegram_id))
            .one(&self.database)
            .await?;
        Ok(model.map(User::from))
    }

    /// Checks whether a sender may use the bot.
    pub async fn authorization(&self, telegram_id: i64) -> ResultLedger<Authorization> {
        match self.user_by_telegram_id(telegram_id).await? {
            Some(user) if user.is_authorized => Ok(Authorization::Granted(user)),
            Some(user) => Ok(Authorization::Revoked(user)),
            None => Ok(Authorization::Unknown),
        }
    }

    /// Every registered user in store order (ascending id).
    pub async fn all_users(&self) -> ResultLedger<Vec<User>> {
        let models = users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(&self.database)
            .await?;
        Ok(models.into_iter().map(User::from).collect())
    }

    /// Every registered user except `user_id`, in store order.
    pub async fn users_except(&self, user_id: i32) -> ResultLedger<Vec<User>> {
        let models = users::Entity::find()
            .filter(users::Column::Id.ne(user_id))
            .order_by_asc(users::Column::Id)
            .all(&self.database)
            .await?;
        Ok(models.into_iter().map(User::from).collect())
    }

    /// Flips the authorization flag. Returns the updated user, or `None`
    /// when no user has that telegram id.
    pub async fn set_authorized(
        &self,
        telegram_id: i64,
        authorized: bool,
    ) -> ResultLedger<Option<User>> {
        let Some(model) = users::Entity::find()
            .filter(users::Column::TelegramId.eq(telegram_id))
            .one(&self.database)
            .await?
        else {
            return Ok(None);
        };

        let updated = users::ActiveModel {
            id: ActiveValue::Set(model.id),
            is_authorized: ActiveValue::Set(authorized),
            ..Default::default()
        }
        .update(&self.database)
        .await?;

        Ok(Some(User::from(updated)))
    }

    /// Resolves a mentioned name fragment to another user.
    ///
    /// The acting user is always excluded, so a message that only matches
    /// the sender's own name resolves to nothing.
    pub async fn resolve_party(&self, user_id: i32, fragment: &str) -> ResultLedger<PartyMatch> {
        let others = self.users_except(user_id).await?;
        if others.is_empty() {
            return Ok(PartyMatch::NoOthers);
        }
        match party::resolve(fragment, &others) {
            Some(found) => Ok(PartyMatch::Found(found.clone())),
            None => Ok(PartyMatch::NotFound { others }),
        }
    }

    /// Default counterparty for a debt with no name mentioned.
    ///
    /// Only an unambiguous roster resolves: exactly one other registered
    /// user. With several candidates the sender must name one, so the
    /// guess is refused rather than silently attached to whoever happens
    /// to sort first.
    pub async fn default_counterparty(&self, user_id: i32) -> ResultLedger<Counterparty> {
        let mut others = self.users_except(user_id).await?;
        match others.len() {
            0 => Ok(Counterparty::NoOthers),
            1 => Ok(Counterparty::Sole(others.remove(0))),
            _ => Ok(Counterparty::Ambiguous(others)),
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Expenses
    // ───────────────────────────────────────────────────────────────────

    /// Creates an expense.
    ///
    /// The due date is parsed leniently: a malformed string is logged and
    /// stored as `NULL` rather than failing the whole registration.
    pub async fn create_expense(&self, new: NewExpense) -> ResultLedger<Expense> {
        if !new.amount.is_positive() {
            return Err(LedgerError::InvalidAmount(
                "amount must be > 0".to_string(),
            ));
        }
        if new.payer_id == new.debtor_id {
            return Err(LedgerError::InvalidParties(
                "payer and debtor must differ".to_string(),
            ));
        }

        let due_date = new.due_date.as_deref().and_then(parse_due_date);

        let model = expenses::ActiveModel {
            id: ActiveValue::NotSet,
            created_at: ActiveValue::Set(Utc::now()),
            description: ActiveValue::Set(new.description),
            amount_minor: ActiveValue::Set(new.amount.minor()),
            currency: ActiveValue::Set(new.currency),
            payer_id: ActiveValue::Set(new.payer_id),
            debtor_id: ActiveValue::Set(new.debtor_id),
            raw_text: ActiveValue::Set(new.raw_text),
            is_settled: ActiveValue::Set(false),
            category: ActiveValue::Set(new.category),
            due_date: ActiveValue::Set(due_date),
        }
        .insert(&self.database)
        .await?;

        Ok(Expense::from(model))
    }

    pub async fn expense(&self, expense_id: i32) -> ResultLedger<Option<Expense>> {
        let model = expenses::Entity::find_by_id(expense_id)
            .one(&self.database)
            .await?;
        Ok(model.map(Expense::from))
    }

    /// An expense with both party names attached.
    pub async fn expense_view(&self, expense_id: i32) -> ResultLedger<Option<ExpenseView>> {
        let Some(expense) = self.expense(expense_id).await? else {
            return Ok(None);
        };
        let names = self.user_names().await?;
        Ok(Some(attach_names(expense, &names)))
    }

    /// Open debts where the user owes money, in display order.
    pub async fn debts_to_pay(&self, user_id: i32) -> ResultLedger<Vec<ExpenseView>> {
        let models = expenses::Entity::find()
            .filter(expenses::Column::DebtorId.eq(user_id))
            .filter(expenses::Column::IsSettled.eq(false))
            .all(&self.database)
            .await?;
        self.into_sorted_views(models).await
    }

    /// Open debts where the user is owed money, in display order.
    pub async fn debts_to_collect(&self, user_id: i32) -> ResultLedger<Vec<ExpenseView>> {
        let models = expenses::Entity::find()
            .filter(expenses::Column::PayerId.eq(user_id))
            .filter(expenses::Column::IsSettled.eq(false))
            .all(&self.database)
            .await?;
        self.into_sorted_views(models).await
    }

    /// Both directions of a user's open expenses, newest first. Used by the
    /// summary view.
    pub async fn open_expenses(
        &self,
        user_id: i32,
    ) -> ResultLedger<(Vec<ExpenseView>, Vec<ExpenseView>)> {
        let to_pay = expenses::Entity::find()
            .filter(expenses::Column::DebtorId.eq(user_id))
            .filter(expenses::Column::IsSettled.eq(false))
            .order_by_desc(expenses::Column::CreatedAt)
            .all(&self.database)
            .await?;
        let to_collect = expenses::Entity::find()
            .filter(expenses::Column::PayerId.eq(user_id))
            .filter(expenses::Column::IsSettled.eq(false))
            .order_by_desc(expenses::Column::CreatedAt)
            .all(&self.database)
            .await?;

        let names = self.user_names().await?;
        let to_pay = to_pay
            .into_iter()
            .map(|m| attach_names(Expense::from(m), &names))
            .collect();
        let to_collect = to_collect
            .into_iter()
            .map(|m| attach_names(Expense::from(m), &names))
            .collect();
        Ok((to_pay, to_collect))
    }

    /// Flips an expense from pending to settled.
    ///
    /// The update is guarded on `is_settled = false`, so only one of several
    /// concurrent attempts wins; the rest observe [`Settlement::AlreadySettled`].
    pub async fn mark_paid(&self, expense_id: i32) -> ResultLedger<Settlement> {
        let result = expenses::Entity::update_many()
            .col_expr(expenses::Column::IsSettled, Expr::value(true))
            .filter(expenses::Column::Id.eq(expense_id))
            .filter(expenses::Column::IsSettled.eq(false))
            .exec(&self.database)
            .await?;

        if result.rows_affected == 1 {
            tracing::info!(expense_id, "expense settled");
            return match self.expense_view(expense_id).await? {
                Some(view) => Ok(Settlement::Settled(view)),
                None => Ok(Settlement::NotFound),
            };
        }

        match self.expense(expense_id).await? {
            Some(_) => Ok(Settlement::AlreadySettled),
            None => Ok(Settlement::NotFound),
        }
    }

    /// Removes an expense, returning a snapshot of the row as it was before
    /// deletion (party names included) for the receipt.
    pub async fn delete_expense(&self, expense_id: i32) -> ResultLedger<Option<ExpenseView>> {
        let Some(model) = expenses::Entity::find_by_id(expense_id)
            .one(&self.database)
            .await?
        else {
            return Ok(None);
        };

        let names = self.user_names().await?;
        let snapshot = attach_names(Expense::from(model.clone()), &names);

        model.delete(&self.database).await?;
        tracing::info!(expense_id, "expense deleted");
        Ok(Some(snapshot))
    }

    async fn into_sorted_views(
        &self,
        models: Vec<expenses::Model>,
    ) -> ResultLedger<Vec<ExpenseView>> {
        let expenses = models.into_iter().map(Expense::from).collect();
        let names = self.user_names().await?;
        Ok(sort_for_display(expenses)
            .into_iter()
            .map(|expense| attach_names(expense, &names))
            .collect())
    }

    async fn user_names(&self) -> ResultLedger<HashMap<i32, String>> {
        let models = users::Entity::find().all(&self.database).await?;
        Ok(models.into_iter().map(|m| (m.id, m.name)).collect())
    }
}

fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(err) => {
            tracing::warn!(raw, %err, "unparseable due date, storing none");
            None
        }
    }
}

fn attach_names(expense: Expense, names: &HashMap<i32, String>) -> ExpenseView {
    let fallback = || "Usuario".to_string();
    ExpenseView {
        payer_name: names.get(&expense.payer_id).cloned().unwrap_or_else(fallback),
        debtor_name: names
            .get(&expense.debtor_id)
            .cloned()
            .unwrap_or_else(fallback),
        expense,
    }
}
