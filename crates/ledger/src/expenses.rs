//! Shared-expense primitives.
//!
//! An `Expense` is a single two-party debt: the debtor owes the payer the
//! full amount until the row is settled. Settlement is one-way; a settled
//! expense never goes back to pending.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub amount: Money,
    pub currency: String,
    pub payer_id: i32,
    pub debtor_id: i32,
    pub raw_text: Option<String>,
    pub is_settled: bool,
    pub category: Option<String>,
    pub due_date: Option<NaiveDate>,
}

/// An expense together with the display names of both parties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseView {
    pub expense: Expense,
    pub payer_name: String,
    pub debtor_name: String,
}

/// Input for creating a new expense. The due date stays a raw string here;
/// the ledger parses it leniently on insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewExpense {
    pub description: String,
    pub amount: Money,
    pub currency: String,
    pub payer_id: i32,
    pub debtor_id: i32,
    pub raw_text: Option<String>,
    pub category: Option<String>,
    pub due_date: Option<String>,
}

/// Urgency of a due date relative to a given day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DueStatus {
    Overdue,
    DueToday,
    Upcoming,
    None,
}

/// Classifies a due date against `today`.
#[must_use]
pub fn due_status(due_date: Option<NaiveDate>, today: NaiveDate) -> DueStatus {
    match due_date {
        Some(due) if due < today => DueStatus::Overdue,
        Some(due) if due == today => DueStatus::DueToday,
        Some(_) => DueStatus::Upcoming,
        None => DueStatus::None,
    }
}

/// Orders open debts for display.
///
/// Dated debts come first, ascending by `(due_date, created_at)`, so the
/// most urgent payment leads the list. Undated debts follow, descending by
/// `created_at` (most recent first).
#[must_use]
pub fn sort_for_display(mut expenses: Vec<Expense>) -> Vec<Expense> {
    let (mut dated, mut undated): (Vec<_>, Vec<_>) = expenses
        .drain(..)
        .partition(|expense| expense.due_date.is_some());
    dated.sort_by_key(|expense| (expense.due_date, expense.created_at));
    undated.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    dated.extend(undated);
    dated
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "expenses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTimeUtc,
    pub description: String,
    pub amount_minor: i64,
    pub currency: String,
    pub payer_id: i32,
    pub debtor_id: i32,
    pub raw_text: Option<String>,
    pub is_settled: bool,
    pub category: Option<String>,
    pub due_date: Option<Date>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::PayerId",
        to = "super::users::Column::Id"
    )]
    Payer,
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::DebtorId",
        to = "super::users::Column::Id"
    )]
    Debtor,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Expense {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            created_at: model.created_at,
            description: model.description,
            amount: Money::new(model.amount_minor),
            currency: model.currency,
            payer_id: model.payer_id,
            debtor_id: model.debtor_id,
            raw_text: model.raw_text,
            is_settled: model.is_settled,
            category: model.category,
            due_date: model.due_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn expense(id: i32, created_day: u32, due_date: Option<&str>) -> Expense {
        Expense {
            id,
            created_at: Utc
                .with_ymd_and_hms(2024, 1, created_day, 12, 0, 0)
                .single()
                .unwrap(),
            description: format!("expense {id}"),
            amount: Money::new(10_000_00),
            currency: "COP".to_string(),
            payer_id: 1,
            debtor_id: 2,
            raw_text: None,
            is_settled: false,
            category: None,
            due_date: due_date.map(|d| d.parse().unwrap()),
        }
    }

    #[test]
    fn dated_debts_lead_ascending_then_undated_descending() {
        let input = vec![
            expense(1, 1, Some("2024-01-10")),
            expense(2, 2, None),
            expense(3, 3, Some("2024-01-05")),
            expense(4, 4, None),
        ];

        let sorted = sort_for_display(input);
        let ids: Vec<i32> = sorted.iter().map(|e| e.id).collect();
        // Dated ascending by due date, then undated newest-first.
        assert_eq!(ids, vec![3, 1, 4, 2]);
    }

    #[test]
    fn dated_ties_break_on_created_at() {
        let first = expense(1, 5, Some("2024-02-01"));
        let second = expense(2, 3, Some("2024-02-01"));

        let sorted = sort_for_display(vec![first, second]);
        let ids: Vec<i32> = sorted.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn due_status_against_fixed_today() {
        let today: NaiveDate = "2024-01-15".parse().unwrap();
        assert_eq!(
            due_status(Some("2024-01-10".parse().unwrap()), today),
            DueStatus::Overdue
        );
        assert_eq!(
            due_status(Some("2024-01-15".parse().unwrap()), today),
            DueStatus::DueToday
        );
        assert_eq!(
            due_status(Some("2024-02-01".parse().unwrap()), today),
            DueStatus::Upcoming
        );
        assert_eq!(due_status(None, today), DueStatus::None);
    }
}
