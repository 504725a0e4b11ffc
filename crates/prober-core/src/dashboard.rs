//! Dashboard gateway
//!
//! Read path over the result store. A missing value renders as unknown and
//! starts a background run; the render itself never waits for that run and
//! never fails because a value is missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{ProberError, Result};
use crate::gateway::{COMPLIANT, NON_COMPLIANT, NOT_APPLICABLE};
use crate::orchestrator::RunTrigger;
use crate::registry::{ProbeCategory, ProbeRegistry};
use crate::store::ResultStore;
use crate::telemetry::ProberMetrics;

/// Reading of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    NotApplicable,
    /// Stored value is not a known compliance token
    Other,
}

impl ComplianceStatus {
    pub fn classify(value: &str) -> Self {
        match value {
            COMPLIANT => ComplianceStatus::Compliant,
            NON_COMPLIANT => ComplianceStatus::NonCompliant,
            NOT_APPLICABLE => ComplianceStatus::NotApplicable,
            _ => ComplianceStatus::Other,
        }
    }
}

/// Current state of one probe as seen by the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbeState {
    Known {
        value: String,
        status: ComplianceStatus,
        observed_at: DateTime<Utc>,
        age_seconds: i64,
    },
    /// No stored value; a fresh run has been requested
    Unknown,
}

impl ProbeState {
    pub fn is_unknown(&self) -> bool {
        matches!(self, ProbeState::Unknown)
    }

    /// Stored value, if any
    pub fn value(&self) -> Option<&str> {
        match self {
            ProbeState::Known { value, .. } => Some(value),
            ProbeState::Unknown => None,
        }
    }
}

/// One dashboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeView {
    pub probe_id: String,
    pub title: String,
    pub description: String,
    pub docs_url: String,
    pub category: ProbeCategory,
    #[serde(flatten)]
    pub state: ProbeState,
}

/// Result of one render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardView {
    pub rendered_at: DateTime<Utc>,
    pub probes: Vec<ProbeView>,
    /// Number of probes without a stored value
    pub pending: usize,
    /// Whether this render started a background run
    pub run_triggered: bool,
}

impl DashboardView {
    pub fn probe(&self, probe_id: &str) -> Option<&ProbeView> {
        self.probes.iter().find(|p| p.probe_id == probe_id)
    }
}

/// Read-and-trigger surface over the result store
#[derive(Clone)]
pub struct DashboardGateway {
    registry: Arc<ProbeRegistry>,
    store: Arc<dyn ResultStore>,
    trigger: Arc<dyn RunTrigger>,
    metrics: ProberMetrics,
}

impl std::fmt::Debug for DashboardGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardGateway")
            .field("probes", &self.registry.len())
            .field("namespace", &self.store.namespace())
            .finish_non_exhaustive()
    }
}

impl DashboardGateway {
    pub fn new(
        registry: Arc<ProbeRegistry>,
        store: Arc<dyn ResultStore>,
        trigger: Arc<dyn RunTrigger>,
        metrics: ProberMetrics,
    ) -> Self {
        Self {
            registry,
            store,
            trigger,
            metrics,
        }
    }

    /// Read every probe; trigger one background run if any is missing
    pub async fn render(&self) -> DashboardView {
        let now = Utc::now();
        let mut probes = Vec::with_capacity(self.registry.len());

        for def in self.registry.iter() {
            let state = match self.store.get(&def.id).await {
                Ok(Some(result)) => ProbeState::Known {
                    status: ComplianceStatus::classify(&result.value),
                    age_seconds: result.age_seconds(now),
                    observed_at: result.observed_at,
                    value: result.value,
                },
                Ok(None) => ProbeState::Unknown,
                Err(e) => {
                    tracing::warn!(probe = %def.id, "Result read failed, showing as unknown: {}", e);
                    ProbeState::Unknown
                }
            };

            probes.push(ProbeView {
                probe_id: def.id.clone(),
                title: def.title.clone(),
                description: def.description.clone(),
                docs_url: def.docs_url.clone(),
                category: def.category,
                state,
            });
        }

        let pending = probes.iter().filter(|p| p.state.is_unknown()).count();
        let run_triggered = pending > 0;
        if run_triggered {
            tracing::info!(pending, "Missing probe results, triggering evaluation run");
            self.metrics.record_trigger();
            self.trigger.trigger();
        }
        self.metrics.record_render();

        DashboardView {
            rendered_at: now,
            probes,
            pending,
            run_triggered,
        }
    }

    /// Start a background re-evaluation of one probe
    pub fn recheck(&self, probe_id: &str) -> Result<()> {
        if !self.registry.contains(probe_id) {
            return Err(ProberError::UnknownProbe(probe_id.to_string()));
        }
        tracing::info!(probe = probe_id, "Recheck requested");
        self.trigger.trigger_probe(probe_id);
        Ok(())
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a view as an HTML fragment, one section per category.
///
/// When `recheck_base` is set every probe gets a form posting to
/// `{recheck_base}/{probe_id}`.
pub fn render_html(view: &DashboardView, recheck_base: Option<&str>) -> String {
    let mut html = String::new();
    let categories: BTreeSet<ProbeCategory> = view.probes.iter().map(|p| p.category).collect();

    for category in categories {
        let _ = writeln!(
            html,
            "<h2 style=\"margin-top: 40px\">{}</h2>",
            category.heading()
        );

        for probe in view.probes.iter().filter(|p| p.category == category) {
            let (mark, failing) = match &probe.state {
                ProbeState::Known { status, .. } => match status {
                    ComplianceStatus::Compliant | ComplianceStatus::NotApplicable => ("&#9989;", false),
                    ComplianceStatus::NonCompliant | ComplianceStatus::Other => ("&#10060;", true),
                },
                ProbeState::Unknown => ("&#8987;", false),
            };
            let title = if probe.title.is_empty() {
                &probe.probe_id
            } else {
                &probe.title
            };

            let _ = writeln!(
                html,
                "<h3 style=\"margin-top: 20px\">{} {}</h3>\n<p>{}</p>\n<p>",
                mark,
                escape_html(title),
                escape_html(&probe.description)
            );

            match &probe.state {
                ProbeState::Known { age_seconds, .. } => {
                    let _ = writeln!(html, "<small>checked {}s ago</small>", age_seconds);
                }
                ProbeState::Unknown => html.push_str("<small>pending evaluation</small>\n"),
            }

            if failing && !probe.docs_url.is_empty() {
                let _ = writeln!(
                    html,
                    "<a class=\"btn btn-primary\" href=\"{}\" target=\"_blank\">Fix it</a>",
                    escape_html(&probe.docs_url)
                );
            }

            if let Some(base) = recheck_base {
                let _ = writeln!(
                    html,
                    "<form method=\"post\" action=\"{}/{}\"><button class=\"btn btn-primary\">Recheck</button></form>",
                    base.trim_end_matches('/'),
                    escape_html(&probe.probe_id)
                );
            }
            html.push_str("</p>\n");
        }
    }

    html
}
