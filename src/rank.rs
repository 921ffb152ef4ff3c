// SPDX-License-Identifier: GPL-2.0

use std::cmp::Reverse;
use std::str::FromStr;

use anyhow::anyhow;

use crate::aggregate::IrqStat;
use crate::render::ViewMode;
use crate::render::ViewState;

/// What to order the table by. Count-valued keys sort descending
/// (heaviest interrupt load first); `irq-number` and `name` sort
/// ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Delta of one node's count, descending.
    Node(usize),
    /// Total delta across all CPUs, descending.
    Totals,
    /// Numeric row id, ascending; pseudo-rows (non-numeric ids) last.
    IrqNumber,
    /// Label, ascending lexical.
    Name,
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "totals" => Ok(SortKey::Totals),
            "irq-number" => Ok(SortKey::IrqNumber),
            "name" => Ok(SortKey::Name),
            other => other.parse::<usize>().map(SortKey::Node).map_err(|_| {
                anyhow!(
                    "invalid sort key {:?}, expected totals, irq-number, name or a node id",
                    other
                )
            }),
        }
    }
}

fn passes_filters(row: &IrqStat, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| row.label.contains(f))
}

/// Delta that decides liveness of a row in the current view: the
/// viewed node's delta in Node mode, the total delta in Totals mode.
fn relevant_delta(row: &IrqStat, mode: ViewMode) -> u64 {
    match mode {
        ViewMode::Totals => row.total_delta(),
        ViewMode::Node(node) => row.node_delta(node),
    }
}

/// Filter, sort and truncate @rows for display. Sorts are stable, so
/// ties keep snapshot order.
pub fn rank(mut rows: Vec<IrqStat>, view: &ViewState) -> Vec<IrqStat> {
    rows.retain(|r| passes_filters(r, &view.filters));
    if !view.show_zero {
        rows.retain(|r| relevant_delta(r, view.mode) != 0);
    }

    match view.sort {
        SortKey::Totals => rows.sort_by_key(|r| Reverse(r.total_delta())),
        SortKey::Node(node) => rows.sort_by_key(|r| Reverse(r.node_delta(node))),
        SortKey::IrqNumber => rows.sort_by_key(|r| r.id.parse::<u64>().unwrap_or(u64::MAX)),
        SortKey::Name => rows.sort_by(|a, b| a.label.cmp(&b.label)),
    }

    if view.max_rows > 0 {
        rows.truncate(view.max_rows);
    }
    rows
}
