// SPDX-License-Identifier: GPL-2.0
//
// Table formatting. One shared field width covers every numeric column
// so the table stays aligned; the width follows the widest delta seen
// in the current row set, floored at the widest header token. The very
// first paint resets to the floor because cycle-0 values are cumulative
// since boot and would lock in an absurdly wide table.

use crate::aggregate::IrqStat;
use crate::rank::SortKey;
use crate::topology::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Every node's aggregate column side by side.
    Totals,
    /// One node's aggregate plus each of its CPUs.
    Node(usize),
}

#[derive(Debug, Clone)]
pub struct ViewState {
    pub mode: ViewMode,
    pub sort: SortKey,
    pub filters: Vec<String>,
    pub show_zero: bool,
    pub max_rows: usize,
}

#[derive(Debug, Default)]
pub struct Renderer {
    width: usize,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format @rows as a header line plus one line per row. The caller
    /// normalizes the mode; a Node mode naming an unknown node renders
    /// as Totals.
    pub fn render(
        &mut self,
        rows: &[IrqStat],
        view: &ViewState,
        topo: &Topology,
        first_cycle: bool,
    ) -> Vec<String> {
        let mode = match view.mode {
            ViewMode::Node(node) if topo.has_node(node) => view.mode,
            _ => ViewMode::Totals,
        };

        let mut headers = vec!["TOTAL".to_string()];
        match mode {
            ViewMode::Totals => {
                for node in topo.nodes().keys() {
                    headers.push(format!("Node{}", node));
                }
            }
            ViewMode::Node(node) => {
                headers.push(format!("Node{}", node));
                for cpu in &topo.nodes()[&node] {
                    headers.push(format!("CPU{}", cpu));
                }
            }
        }

        let values = |row: &IrqStat| -> Vec<u64> {
            let mut vals = vec![row.total_delta()];
            match mode {
                ViewMode::Totals => {
                    for node in topo.nodes().keys() {
                        vals.push(row.node_delta(*node));
                    }
                }
                ViewMode::Node(node) => {
                    vals.push(row.node_delta(node));
                    for cpu in &topo.nodes()[&node] {
                        vals.push(row.cpu_delta(*cpu));
                    }
                }
            }
            vals
        };

        let floor = headers.iter().map(|h| h.len()).max().unwrap_or(0);
        self.width = if first_cycle {
            floor
        } else {
            rows.iter()
                .flat_map(|r| values(r))
                .map(|v| v.to_string().len())
                .max()
                .unwrap_or(0)
                .max(floor)
        };

        let id_width = rows
            .iter()
            .map(|r| r.id.len())
            .max()
            .unwrap_or(0)
            .max("IRQ".len());

        let mut out = Vec::with_capacity(rows.len() + 1);
        let mut header = format!("{:>id_width$}", "IRQ");
        for h in &headers {
            header.push_str(&format!(" {:>w$}", h, w = self.width));
        }
        header.push_str("  NAME");
        out.push(header);

        for row in rows {
            let mut line = format!("{:>id_width$}", row.id);
            for v in values(row) {
                line.push_str(&format!(" {:>w$}", v, w = self.width));
            }
            line.push_str("  ");
            line.push_str(&row.label);
            out.push(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, carry};
    use crate::snapshot::Snapshot;
    use std::collections::BTreeMap;

    fn topo() -> Topology {
        Topology::parse("node 0 cpus: 0 1\nnode 1 cpus: 2 3\n").unwrap()
    }

    fn view(mode: ViewMode) -> ViewState {
        ViewState {
            mode,
            sort: SortKey::Totals,
            filters: Vec::new(),
            show_zero: true,
            max_rows: 0,
        }
    }

    #[test]
    fn test_totals_mode_end_to_end_deltas() {
        let topo = topo();
        let s1 = Snapshot::parse("CPU0 CPU1 CPU2 CPU3\n16: 100 50 0 0 eth0\n", false).unwrap();
        let s2 = Snapshot::parse("CPU0 CPU1 CPU2 CPU3\n16: 110 60 0 0 eth0\n", false).unwrap();
        let prev = carry(&aggregate(&s1, &topo, &BTreeMap::new()));
        let rows = aggregate(&s2, &topo, &prev);

        let mut r = Renderer::new();
        let lines = r.render(&rows, &view(ViewMode::Totals), &topo, false);
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(fields, vec!["16", "20", "20", "0", "eth0"]);
    }

    #[test]
    fn test_node_mode_columns() {
        let topo = topo();
        let snap = Snapshot::parse("CPU0 CPU1 CPU2 CPU3\n25: 7 0 3 9 nvme0q3\n", false).unwrap();
        let rows = aggregate(&snap, &topo, &BTreeMap::new());

        let mut r = Renderer::new();
        let lines = r.render(&rows, &view(ViewMode::Node(1)), &topo, false);
        let header: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(header, vec!["IRQ", "TOTAL", "Node1", "CPU2", "CPU3", "NAME"]);
        let fields: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(fields, vec!["25", "19", "12", "3", "9", "nvme0q3"]);
    }

    #[test]
    fn test_unknown_node_renders_as_totals() {
        let topo = topo();
        let mut r = Renderer::new();
        let lines = r.render(&[], &view(ViewMode::Node(7)), &topo, false);
        let header: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(header, vec!["IRQ", "TOTAL", "Node0", "Node1", "NAME"]);
    }

    #[test]
    fn test_width_reset_on_first_cycle() {
        let topo = topo();
        let snap = Snapshot::parse(
            "CPU0 CPU1 CPU2 CPU3\n16: 123456789 0 0 0 eth0\n",
            false,
        )
        .unwrap();
        let rows = aggregate(&snap, &topo, &BTreeMap::new());

        let mut r = Renderer::new();
        r.render(&rows, &view(ViewMode::Totals), &topo, true);
        assert_eq!(r.width, "TOTAL".len());

        r.render(&rows, &view(ViewMode::Totals), &topo, false);
        assert_eq!(r.width, "123456789".len());
    }
}
