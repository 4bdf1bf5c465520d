// crates/monitor/src/view.rs
//! The shared "current view" state.
//!
//! Every background activity publishes a fresh immutable `ViewSnapshot`
//! through a `tokio::sync::watch` channel; the render loop only ever reads
//! the latest one. Last write wins — no activity hands out mutable access to
//! shared state, and readers never observe a half-updated view.

use chrono::{DateTime, Duration, Local, Utc};
use claude_ledger_core::{DailyAggregate, LimitScope, LimitsSnapshot};
use claude_ledger_db::{Database, DbResult, DeviceStats, IngestReport, StatsOverview};

/// Which slice of the data the dashboard is currently showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    Daily,
    Devices,
    Limits,
}

impl ViewMode {
    pub fn cycle(self) -> ViewMode {
        match self {
            ViewMode::Daily => ViewMode::Devices,
            ViewMode::Devices => ViewMode::Limits,
            ViewMode::Limits => ViewMode::Daily,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ViewMode::Daily => "daily",
            ViewMode::Devices => "devices",
            ViewMode::Limits => "limits",
        }
    }
}

/// Immutable snapshot of everything the render loop needs.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub refreshed_at: DateTime<Utc>,
    pub mode: ViewMode,
    pub overview: StatsOverview,
    /// Last seven days of aggregates, ascending.
    pub recent_days: Vec<DailyAggregate>,
    /// Latest snapshot per scope, in `LimitScope::ALL` order where present.
    pub limits: Vec<LimitsSnapshot>,
    pub devices: Vec<DeviceStats>,
    /// Outcome of the most recent ingestion pass, if any ran this session.
    pub last_ingest: Option<IngestSummary>,
}

/// The part of an `IngestReport` worth showing.
#[derive(Debug, Clone, Copy)]
pub struct IngestSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed_lines: usize,
}

impl From<&IngestReport> for IngestSummary {
    fn from(report: &IngestReport) -> Self {
        Self {
            inserted: report.inserted,
            duplicates: report.duplicates,
            failed_lines: report.failed_lines,
        }
    }
}

impl ViewSnapshot {
    /// Build a fresh snapshot from the database.
    pub async fn load(
        db: &Database,
        mode: ViewMode,
        last_ingest: Option<IngestSummary>,
    ) -> DbResult<Self> {
        let overview = db.stats_overview().await?;
        let today = Local::now().date_naive();
        let recent_days = db
            .fetch_daily_aggregates(today.checked_sub_days(chrono::Days::new(6)), Some(today))
            .await?;

        let mut limits = Vec::new();
        for scope in LimitScope::ALL {
            if let Some(snapshot) = db.fetch_latest_limits(scope).await? {
                limits.push(snapshot);
            }
        }

        let devices = db.device_stats().await?;

        Ok(Self {
            refreshed_at: Utc::now(),
            mode,
            overview,
            recent_days,
            limits,
            devices,
            last_ingest,
        })
    }

    /// One-line render of the snapshot for the plain terminal consumer.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "[{}] {} · {} records over {} days · {} tokens",
            self.refreshed_at
                .with_timezone(&Local)
                .format("%H:%M:%S"),
            self.mode.title(),
            self.overview.total_records,
            self.overview.total_days,
            self.overview.total_tokens,
        );
        if let Some(ingest) = &self.last_ingest {
            line.push_str(&format!(
                " · last pass +{} ({} dup)",
                ingest.inserted, ingest.duplicates
            ));
        }
        if let Some(session) = self
            .limits
            .iter()
            .find(|s| s.scope == LimitScope::Session)
        {
            line.push_str(&format!(" · session {}%", session.percent_used));
            if self.limits_stale(Duration::minutes(10)) {
                line.push_str(" (stale)");
            }
        }
        line
    }

    /// Whether a limits capture is stale enough to flag.
    pub fn limits_stale(&self, max_age: Duration) -> bool {
        match self.limits.first() {
            Some(snapshot) => self.refreshed_at - snapshot.captured_at > max_age,
            None => true,
        }
    }
}
