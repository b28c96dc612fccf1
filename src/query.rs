use chrono::{Days, Months, NaiveDate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{normalize, Application, Platform, Status};

/// Exact-match filter with an "All" escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter<T> {
    All,
    Only(T),
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Filter::All
    }
}

impl<T: PartialEq> Filter<T> {
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Filter::All => true,
            Filter::Only(wanted) => wanted == value,
        }
    }
}

impl<T: std::fmt::Display> std::fmt::Display for Filter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::All => f.write_str("All"),
            Filter::Only(value) => value.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    DateApplied,
    Company,
    Status,
    FollowUpDate,
}

impl SortKey {
    pub const ALL: [SortKey; 4] = [
        SortKey::DateApplied,
        SortKey::Company,
        SortKey::Status,
        SortKey::FollowUpDate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SortKey::DateApplied => "dateApplied",
            SortKey::Company => "company",
            SortKey::Status => "status",
            SortKey::FollowUpDate => "followUpDate",
        }
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "date" | "dateapplied" => Ok(SortKey::DateApplied),
            "company" => Ok(SortKey::Company),
            "status" => Ok(SortKey::Status),
            "followup" | "followupdate" => Ok(SortKey::FollowUpDate),
            _ => Err(format!(
                "unknown sort key '{}' (expected dateApplied, company, status or followUpDate)",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn toggle(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// Everything the table view depends on besides the collection itself.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub status: Filter<Status>,
    pub platform: Filter<Platform>,
    pub search: String,
    pub sort_by: SortKey,
    pub order: SortOrder,
}

/// Filtered, searched and sorted view of the collection. The sort is
/// stable, so equal keys keep their collection order.
pub fn view<'a>(apps: &'a [Application], state: &ViewState) -> Vec<&'a Application> {
    let needle = state.search.trim().to_lowercase();
    let mut rows: Vec<&Application> = apps
        .iter()
        .filter(|app| state.status.matches(&app.status))
        .filter(|app| state.platform.matches(app.platform_or_default()))
        .filter(|app| needle.is_empty() || matches_search(app, &needle))
        .collect();

    rows.sort_by(|a, b| {
        let ordering = compare(a, b, state.sort_by);
        match state.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    rows
}

fn matches_search(app: &Application, needle: &str) -> bool {
    [&app.company, &app.position, &app.notes]
        .iter()
        .any(|text| text.to_lowercase().contains(needle))
}

fn compare(a: &Application, b: &Application, key: SortKey) -> Ordering {
    // Missing dates sort as the earliest possible date.
    let date = |d: Option<NaiveDate>| d.unwrap_or(NaiveDate::MIN);

    match key {
        SortKey::DateApplied => date(a.date_applied).cmp(&date(b.date_applied)),
        SortKey::FollowUpDate => date(a.follow_up_date).cmp(&date(b.follow_up_date)),
        SortKey::Company => a.company.to_lowercase().cmp(&b.company.to_lowercase()),
        SortKey::Status => a.status.label().cmp(b.status.label()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlatformCounts {
    pub linkedin: usize,
    pub upwork: usize,
    pub indeed: usize,
    pub company_website: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub by_status: BTreeMap<Status, usize>,
    /// Interview scheduled plus interviewed.
    pub interview: usize,
    pub this_week: usize,
    pub this_month: usize,
    pub by_platform: PlatformCounts,
    /// Percentage of applications that got past `Applied` without being
    /// rejected or withdrawn.
    pub response_rate: u32,
}

impl Stats {
    pub fn count(&self, status: &Status) -> usize {
        self.by_status.get(status).copied().unwrap_or(0)
    }
}

pub fn stats(apps: &[Application], today: NaiveDate) -> Stats {
    let week_start = today.checked_sub_days(Days::new(7)).unwrap_or(NaiveDate::MIN);
    let month_start = today.checked_sub_months(Months::new(1)).unwrap_or(NaiveDate::MIN);
    let applied_since = |start: NaiveDate| {
        apps.iter()
            .filter_map(|a| a.date_applied)
            .filter(|d| *d >= start && *d <= today)
            .count()
    };

    let mut by_status: BTreeMap<Status, usize> =
        Status::ALL.iter().map(|s| (s.clone(), 0)).collect();
    let mut by_platform = PlatformCounts::default();
    let mut responded = 0;

    for app in apps {
        *by_status.entry(app.status.clone()).or_insert(0) += 1;
        if app.status.is_response() {
            responded += 1;
        }
        match app.platform_or_default() {
            Platform::LinkedIn => by_platform.linkedin += 1,
            Platform::Upwork => by_platform.upwork += 1,
            Platform::Indeed => by_platform.indeed += 1,
            Platform::CompanyWebsite => by_platform.company_website += 1,
            _ => by_platform.other += 1,
        }
    }

    let total = apps.len();
    let response_rate = if total == 0 {
        0
    } else {
        (100.0 * responded as f64 / total as f64).round() as u32
    };

    Stats {
        total,
        interview: by_status.get(&Status::InterviewScheduled).copied().unwrap_or(0)
            + by_status.get(&Status::Interviewed).copied().unwrap_or(0),
        by_status,
        this_week: applied_since(week_start),
        this_month: applied_since(month_start),
        by_platform,
        response_rate,
    }
}

/// Applications whose follow-up date has arrived and that are still open,
/// in collection order.
pub fn follow_ups_due(apps: &[Application], today: NaiveDate) -> Vec<&Application> {
    apps.iter().filter(|a| a.is_follow_up_due(today)).collect()
}

/// Count per known status, for labelling a status filter picker.
pub fn status_counts(apps: &[Application]) -> Vec<(Status, usize)> {
    Status::ALL
        .iter()
        .map(|s| (s.clone(), apps.iter().filter(|a| &a.status == s).count()))
        .collect()
}
