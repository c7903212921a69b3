//! Sample report: per-probe timing and a transaction summary.

use crate::session::Session;
use chrono::Local;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use xprobe_trace::{CallSiteId, Sample, Stitched};

/// Timing of one probe. A delta is the tick count from one of its samples to
/// the next sample recorded on the same thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeStats {
    pub call_site: CallSiteId,
    pub name: String,
    pub count: u64,
    pub deltas: u64,
    pub total_delta: u128,
    pub min_delta: Option<u64>,
    pub max_delta: u64,
}

impl ProbeStats {
    fn new(call_site: CallSiteId, name: String) -> Self {
        Self {
            call_site,
            name,
            count: 0,
            deltas: 0,
            total_delta: 0,
            min_delta: None,
            max_delta: 0,
        }
    }

    fn add_delta(&mut self, delta: u64) {
        self.deltas += 1;
        self.total_delta += delta as u128;
        self.min_delta = Some(self.min_delta.map_or(delta, |min| min.min(delta)));
        self.max_delta = self.max_delta.max(delta);
    }

    pub fn mean_delta(&self) -> Option<f64> {
        (self.deltas > 0).then(|| self.total_delta as f64 / self.deltas as f64)
    }
}

/// Aggregate per-thread streams, most sampled probe first.
pub fn probe_stats<F>(streams: &[(u64, Vec<Sample>)], name_of: F) -> Vec<ProbeStats>
where
    F: Fn(CallSiteId) -> Option<String>,
{
    let mut stats: HashMap<CallSiteId, ProbeStats> = HashMap::new();

    for (_, samples) in streams {
        for (i, sample) in samples.iter().enumerate() {
            let entry = stats.entry(sample.call_site).or_insert_with(|| {
                let name = name_of(sample.call_site).unwrap_or_else(|| sample.call_site.to_string());
                ProbeStats::new(sample.call_site, name)
            });
            entry.count += 1;
            if let Some(next) = samples.get(i + 1) {
                entry.add_delta(next.tsc.saturating_sub(sample.tsc));
            }
        }
    }

    let mut stats: Vec<ProbeStats> = stats.into_values().collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    stats
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxnSummary {
    pub transactions: usize,
    pub completed: usize,
    pub cross_thread: usize,
    pub orphan_resumes: usize,
    pub violations: usize,
    pub untracked: usize,
    pub mean_span: Option<f64>,
    pub max_span: u64,
}

impl TxnSummary {
    pub fn from_stitched(stitched: &Stitched) -> Self {
        let spans: Vec<u64> = stitched.transactions.iter().map(|t| t.span()).collect();
        let mean_span = (!spans.is_empty())
            .then(|| spans.iter().map(|s| *s as f64).sum::<f64>() / spans.len() as f64);

        Self {
            transactions: stitched.transactions.len(),
            completed: stitched
                .transactions
                .iter()
                .filter(|t| t.state == xprobe_trace::TxnState::Ended)
                .count(),
            cross_thread: stitched
                .transactions
                .iter()
                .filter(|t| t.threads().len() > 1)
                .count(),
            orphan_resumes: stitched.orphan_resumes.len(),
            violations: stitched.violations.len(),
            untracked: stitched.untracked,
            mean_span,
            max_span: spans.into_iter().max().unwrap_or(0),
        }
    }
}

pub struct Report {
    probes: Vec<ProbeStats>,
    transactions: TxnSummary,
    samples: usize,
    threads: usize,
    overflow: u64,
    elapsed: Duration,
}

impl Report {
    pub fn build(
        session: &Session,
        streams: &[(u64, Vec<Sample>)],
        overflow: u64,
        elapsed: Duration,
    ) -> Self {
        let probes = probe_stats(streams, |id| session.name_of(id).map(str::to_string));
        let transactions = TxnSummary::from_stitched(&session.stitch(streams));
        Self {
            probes,
            transactions,
            samples: streams.iter().map(|(_, s)| s.len()).sum(),
            threads: streams.len(),
            overflow,
            elapsed,
        }
    }

    pub fn probes(&self) -> &[ProbeStats] {
        &self.probes
    }

    pub fn transactions(&self) -> &TxnSummary {
        &self.transactions
    }

    pub fn probe_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["PROBE", "SAMPLES", "MEAN TICKS", "MIN TICKS", "MAX TICKS"]);

        for probe in &self.probes {
            let mean = probe
                .mean_delta()
                .map(|m| format!("{m:.1}"))
                .unwrap_or_else(|| "-".to_string());
            let min = probe
                .min_delta
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string());
            let max = if probe.deltas > 0 {
                probe.max_delta.to_string()
            } else {
                "-".to_string()
            };
            table.add_row(vec![
                Cell::new(&probe.name),
                Cell::new(probe.count).set_alignment(CellAlignment::Right),
                Cell::new(mean).set_alignment(CellAlignment::Right),
                Cell::new(min).set_alignment(CellAlignment::Right),
                Cell::new(max).set_alignment(CellAlignment::Right),
            ]);
        }
        table
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# xprobe report - {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(
            out,
            "# Elapsed: {} | Samples: {} | Threads: {} | Dropped: {}",
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64)),
            self.samples,
            self.threads,
            self.overflow
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", self.probe_table());

        let txn = &self.transactions;
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Transactions: {} ({} completed, {} crossed threads)",
            txn.transactions, txn.completed, txn.cross_thread
        );
        if let Some(mean) = txn.mean_span {
            let _ = writeln!(out, "Span: mean {mean:.1} ticks, max {} ticks", txn.max_span);
        }
        if txn.orphan_resumes > 0 || txn.violations > 0 {
            let _ = writeln!(
                out,
                "Orphaned resumes: {} | Lifecycle violations: {}",
                txn.orphan_resumes, txn.violations
            );
        }
        out
    }
}
