//! Filter store and merge.
//!
//! A [`FilterSet`] starts out empty, is populated once from reference data by
//! the bootstrap patch and from then on only changes through [`merge`].

use crate::error::ValidationError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type AccountId = String;
pub type SecurityId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PnlType {
    #[default]
    Total,
    RealizedTotal,
    UnrealizedTotal,
}

impl PnlType {
    pub fn all() -> &'static [PnlType] {
        &[
            PnlType::Total,
            PnlType::RealizedTotal,
            PnlType::UnrealizedTotal,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PnlType::Total => "total",
            PnlType::RealizedTotal => "realized_total",
            PnlType::UnrealizedTotal => "unrealized_total",
        }
    }

    /// Tab label shown in the chart header
    pub fn label(self) -> &'static str {
        match self {
            PnlType::Total => "Total",
            PnlType::RealizedTotal => "Realized Total",
            PnlType::UnrealizedTotal => "Unrealized Total",
        }
    }

    /// Maps a tab label ("Realized Total") or wire value ("realized_total")
    /// to the enum: lowercase, words joined with underscores.
    pub fn from_label(label: &str) -> Result<Self, ValidationError> {
        let key = label
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        match key.as_str() {
            "total" => Ok(PnlType::Total),
            "realized_total" => Ok(PnlType::RealizedTotal),
            "unrealized_total" => Ok(PnlType::UnrealizedTotal),
            _ => Err(ValidationError::UnknownPnlType(label.to_string())),
        }
    }
}

impl FromStr for PnlType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PnlType::from_label(s)
    }
}

impl fmt::Display for PnlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The active filter values. Fields stay `None` until bootstrap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub accounts: Vec<AccountId>,
    pub security: Option<SecurityId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub pnl_type: Option<PnlType>,
}

impl FilterSet {
    /// Returns the request body for a data fetch, or `None` while any
    /// required field is still unpopulated.
    pub fn snapshot(&self) -> Option<FilterSnapshot> {
        Some(FilterSnapshot {
            accounts: self.accounts.clone(),
            security: self.security.clone()?,
            start_date: self.start_date?,
            end_date: self.end_date?,
            pnl_type: self.pnl_type?,
        })
    }
}

/// A fully populated filter set, serialized as the body of every data request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub accounts: Vec<AccountId>,
    pub security: SecurityId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pnl_type: PnlType,
}

/// A partial update emitted by a widget. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterPatch {
    pub accounts: Option<Vec<AccountId>>,
    pub security: Option<SecurityId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub pnl_type: Option<PnlType>,
}

impl FilterPatch {
    pub fn accounts(accounts: Vec<AccountId>) -> Self {
        FilterPatch {
            accounts: Some(accounts),
            ..Default::default()
        }
    }

    pub fn security(security: impl Into<SecurityId>) -> Self {
        FilterPatch {
            security: Some(security.into()),
            ..Default::default()
        }
    }

    pub fn date_range(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        FilterPatch {
            start_date: Some(start_date),
            end_date: Some(end_date),
            ..Default::default()
        }
    }

    pub fn pnl_type(pnl_type: PnlType) -> Self {
        FilterPatch {
            pnl_type: Some(pnl_type),
            ..Default::default()
        }
    }

    /// Combines two patches; fields set in `later` win.
    pub fn and(self, later: FilterPatch) -> Self {
        FilterPatch {
            accounts: later.accounts.or(self.accounts),
            security: later.security.or(self.security),
            start_date: later.start_date.or(self.start_date),
            end_date: later.end_date.or(self.end_date),
            pnl_type: later.pnl_type.or(self.pnl_type),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == FilterPatch::default()
    }

    /// True when the patch changes nothing but the P/L type.
    pub fn only_pnl_type(&self) -> bool {
        self.pnl_type.is_some()
            && self.accounts.is_none()
            && self.security.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }
}

/// Shallow field-wise override of `current` by `patch`. No validation: an
/// inverted date range is passed through to the backend as-is.
pub fn merge(current: &FilterSet, patch: &FilterPatch) -> FilterSet {
    FilterSet {
        accounts: patch
            .accounts
            .clone()
            .unwrap_or_else(|| current.accounts.clone()),
        security: patch.security.clone().or_else(|| current.security.clone()),
        start_date: patch.start_date.or(current.start_date),
        end_date: patch.end_date.or(current.end_date),
        pnl_type: patch.pnl_type.or(current.pnl_type),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Default for DateRange {
    fn default() -> Self {
        DateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2024, 12, 20).unwrap_or(NaiveDate::MAX),
        }
    }
}

/// Account and security lists loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    pub accounts: Vec<AccountId>,
    pub securities: Vec<SecurityId>,
}

impl ReferenceData {
    /// Accounts are deduplicated keeping the first occurrence.
    pub fn new(accounts: Vec<AccountId>, securities: Vec<SecurityId>) -> Self {
        let mut unique: Vec<AccountId> = Vec::with_capacity(accounts.len());
        for account in accounts {
            if !unique.contains(&account) {
                unique.push(account);
            }
        }
        ReferenceData {
            accounts: unique,
            securities,
        }
    }

    /// Default filters: every account, the first security, the configured
    /// date range and the total P/L type. `None` when either list is empty.
    pub fn bootstrap_patch(&self, range: DateRange) -> Option<FilterPatch> {
        if self.accounts.is_empty() {
            return None;
        }
        let security = self.securities.first()?;
        Some(
            FilterPatch::accounts(self.accounts.clone())
                .and(FilterPatch::security(security.clone()))
                .and(FilterPatch::date_range(range.start, range.end))
                .and(FilterPatch::pnl_type(PnlType::Total)),
        )
    }
}

/// Parses a `YYYY-MM-DD` date typed into the date range inputs.
pub fn parse_date(input: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::DateRequired);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(trimmed.to_string()))
}
