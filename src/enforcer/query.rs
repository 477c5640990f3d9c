//! Typed predicates for selecting and updating keys.
//!
//! The counting queries and the transition engine describe the keys they
//! want with a [`Filter`] and the changes they make with a list of
//! [`Assignment`]s. A storage backend evaluates these however it likes: the
//! in-memory store matches rows directly, a SQL backend would render them
//! into a statement with bound parameters.

use std::fmt;

use super::key::{KeyState, KeyType};
use super::time::UnixTime;

//------------ Column --------------------------------------------------------

/// A column of the key view.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Column {
    KeyId,
    ZoneId,
    PolicyId,
    KeyType,
    State,
    Algorithm,
    Repository,
    Backup,
    FixedDate,
    Revoked,

    /// The timestamp belonging to a state.
    Date(KeyState),
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::KeyId => f.write_str("keypair_id"),
            Column::ZoneId => f.write_str("zone_id"),
            Column::PolicyId => f.write_str("policy_id"),
            Column::KeyType => f.write_str("keytype"),
            Column::State => f.write_str("state"),
            Column::Algorithm => f.write_str("algorithm"),
            Column::Repository => f.write_str("repository_id"),
            Column::Backup => f.write_str("backup"),
            Column::FixedDate => f.write_str("fixed_date"),
            Column::Revoked => f.write_str("revoked"),
            Column::Date(state) => write!(f, "{state}"),
        }
    }
}

/// Something that has values for columns.
///
/// A `None` value is NULL and, as in SQL, never satisfies a comparison.
pub trait Row {
    fn field(&self, column: Column) -> Option<i64>;
}

//------------ Compare -------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Compare {
    fn holds(self, left: i64, right: i64) -> bool {
        match self {
            Compare::Eq => left == right,
            Compare::Ne => left != right,
            Compare::Lt => left < right,
            Compare::Le => left <= right,
            Compare::Gt => left > right,
            Compare::Ge => left >= right,
        }
    }
}

impl fmt::Display for Compare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compare::Eq => "=",
            Compare::Ne => "<>",
            Compare::Lt => "<",
            Compare::Le => "<=",
            Compare::Gt => ">",
            Compare::Ge => ">=",
        })
    }
}

//------------ Predicate -----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Predicate {
    Compare(Column, Compare, i64),
    In(Column, Vec<i64>),
    IsNull(Column),
    NotNull(Column),

    /// At least one of the predicates holds.
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, row: &impl Row) -> bool {
        match self {
            Predicate::Compare(column, cmp, value) => row
                .field(*column)
                .is_some_and(|field| cmp.holds(field, *value)),
            Predicate::In(column, values) => row
                .field(*column)
                .is_some_and(|field| values.contains(&field)),
            Predicate::IsNull(column) => row.field(*column).is_none(),
            Predicate::NotNull(column) => row.field(*column).is_some(),
            Predicate::Any(preds) => preds.iter().any(|p| p.matches(row)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare(column, cmp, value) => write!(f, "{column} {cmp} {value}"),
            Predicate::In(column, values) => {
                write!(f, "{column} IN (")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            Predicate::IsNull(column) => write!(f, "{column} IS NULL"),
            Predicate::NotNull(column) => write!(f, "{column} IS NOT NULL"),
            Predicate::Any(preds) => {
                f.write_str("(")?;
                for (i, pred) in preds.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    write!(f, "{pred}")?;
                }
                f.write_str(")")
            }
        }
    }
}

//------------ ZoneScope -----------------------------------------------------

/// Which zones an operation applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZoneScope {
    Zone(u64),

    /// Every zone. Keys not allocated to a zone are never included.
    All,
}

//------------ Filter --------------------------------------------------------

/// A conjunction of predicates with optional ordering and limit.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
    order_by: Option<Column>,
    limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn keytype(self, keytype: KeyType) -> Self {
        self.and(Predicate::Compare(
            Column::KeyType,
            Compare::Eq,
            keytype.code(),
        ))
    }

    pub fn state(self, state: KeyState) -> Self {
        self.and(Predicate::Compare(Column::State, Compare::Eq, state.code()))
    }

    pub fn states(self, states: &[KeyState]) -> Self {
        self.and(Predicate::In(
            Column::State,
            states.iter().map(|s| s.code()).collect(),
        ))
    }

    pub fn zone(self, scope: ZoneScope) -> Self {
        match scope {
            ZoneScope::Zone(id) => {
                self.and(Predicate::Compare(Column::ZoneId, Compare::Eq, field(id)))
            }
            ZoneScope::All => self.and(Predicate::NotNull(Column::ZoneId)),
        }
    }

    pub fn policy(self, policy_id: u64) -> Self {
        self.and(Predicate::Compare(
            Column::PolicyId,
            Compare::Eq,
            field(policy_id),
        ))
    }

    pub fn ids(self, ids: &[u64]) -> Self {
        self.and(Predicate::In(
            Column::KeyId,
            ids.iter().copied().map(field).collect(),
        ))
    }

    pub fn date(self, state: KeyState, cmp: Compare, time: UnixTime) -> Self {
        self.and(Predicate::Compare(Column::Date(state), cmp, time.as_field()))
    }

    pub fn order_by(mut self, column: Column) -> Self {
        self.order_by = Some(column);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &impl Row) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Select matching rows, applying ordering and limit.
    ///
    /// Ordering is stable and puts NULL values first.
    pub fn select<'a, R: Row + Clone + 'a>(&self, rows: impl IntoIterator<Item = &'a R>) -> Vec<R> {
        let mut res: Vec<R> = rows
            .into_iter()
            .filter(|row| self.matches(*row))
            .cloned()
            .collect();
        if let Some(column) = self.order_by {
            res.sort_by_key(|row| row.field(column));
        }
        if let Some(limit) = self.limit {
            res.truncate(limit);
        }
        res
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            f.write_str("TRUE")?;
        }
        for (i, pred) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{pred}")?;
        }
        if let Some(column) = self.order_by {
            write!(f, " ORDER BY {column}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

//------------ Assignment ----------------------------------------------------

/// A new value for a column.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Assignment {
    pub column: Column,
    pub value: Option<i64>,
}

impl Assignment {
    pub fn state(state: KeyState) -> Self {
        Assignment {
            column: Column::State,
            value: Some(state.code()),
        }
    }

    pub fn date(state: KeyState, time: Option<UnixTime>) -> Self {
        Assignment {
            column: Column::Date(state),
            value: time.map(UnixTime::as_field),
        }
    }

    pub fn fixed_date(fixed: bool) -> Self {
        Assignment {
            column: Column::FixedDate,
            value: Some(fixed.into()),
        }
    }

    pub fn backup(time: UnixTime) -> Self {
        Assignment {
            column: Column::Backup,
            value: Some(time.as_field()),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{} = {value}", self.column),
            None => write!(f, "{} = NULL", self.column),
        }
    }
}

/// Convert an identifier into a field value.
fn field(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}
