// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parser for MIP solver node-log lines.
//!
//! The branch-and-bound log looks like:
//!
//! ```text
//!         Nodes                                         Cuts/
//!    Node  Left     Objective  IInf  Best Integer    Best Bound    ItCnt     Gap
//!
//! *     0+    0                          124.0000      102.0000       10   17.74%
//!       0     0      102.0000    12      124.0000     Cuts: 5         20   17.74%
//!     100    82      110.0000     5                    103.0000      300
//! *   150    90      integral     0      120.0000      105.0000      400   12.50%
//! ```
//!
//! A leading `*` marks a new incumbent; a `+` after the node number marks a
//! heuristic solution row without objective columns. Lines that are not node
//! rows yield `None`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One parsed row of the solver's node log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLogEntry {
    pub time: DateTime<Utc>,
    /// The row reports a new incumbent.
    pub is_solution: bool,
    pub node: u64,
    pub nodes_left: u64,
    /// `None` for heuristic rows and for `integral`/`infeasible`/`cutoff` nodes.
    pub objective: Option<f64>,
    /// Number of integer-infeasible variables.
    pub iinf: Option<u64>,
    pub best_integer: Option<f64>,
    pub best_bound: Option<f64>,
    pub total_iterations: Option<u64>,
    /// Relative gap in percent, as printed.
    pub gap: Option<f64>,
    pub raw_line: String,
}

fn number(token: &str) -> Option<f64> {
    token.parse().ok()
}

/// Parse one log line.
pub fn parse_line(line: &str) -> Option<RunLogEntry> {
    let trimmed = line.trim();
    let (is_solution, rest) = match trimmed.strip_prefix('*') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() < 3 {
        return None;
    }

    let node_token = tokens[0];
    let heuristic = node_token.ends_with('+');
    let node: u64 = node_token.trim_end_matches('+').parse().ok()?;
    let nodes_left: u64 = tokens[1].parse().ok()?;

    let mut body = &tokens[2..];
    let gap = match body.last() {
        Some(last) if last.ends_with('%') => {
            let value = number(last.trim_end_matches('%'));
            body = &body[..body.len() - 1];
            value
        }
        _ => None,
    };

    let mut entry = RunLogEntry {
        time: Utc::now(),
        is_solution,
        node,
        nodes_left,
        objective: None,
        iinf: None,
        best_integer: None,
        best_bound: None,
        total_iterations: None,
        gap,
        raw_line: line.to_string(),
    };

    if heuristic {
        // node+ left best-integer best-bound itcnt
        let [best_integer, best_bound, itcnt] = body else {
            return None;
        };
        entry.best_integer = number(best_integer);
        entry.best_bound = number(best_bound);
        entry.total_iterations = itcnt.parse().ok();
        return Some(entry);
    }

    let (objective, rest) = body.split_first()?;
    body = rest;
    match *objective {
        "integral" => {
            entry.iinf = body.first().and_then(|t| t.parse().ok());
            body = body.get(1..).unwrap_or_default();
        }
        "infeasible" | "cutoff" | "unbounded" => {}
        value => {
            entry.objective = Some(number(value)?);
            entry.iinf = body.first().and_then(|t| t.parse().ok());
            body = body.get(1..).unwrap_or_default();
        }
    }

    // Cut rounds print "Label: count" in place of the best bound.
    if let Some(label) = body.iter().position(|t| t.ends_with(':')) {
        if label == 1 {
            entry.best_integer = number(body[0]);
        }
        entry.total_iterations = body.get(label + 2).and_then(|t| t.parse().ok());
        return Some(entry);
    }

    match body {
        [best_integer, best_bound, itcnt] => {
            entry.best_integer = number(best_integer);
            entry.best_bound = number(best_bound);
            entry.total_iterations = itcnt.parse().ok();
        }
        [best_bound, itcnt] => {
            entry.best_bound = number(best_bound);
            entry.total_iterations = itcnt.parse().ok();
        }
        [itcnt] => entry.total_iterations = itcnt.parse().ok(),
        _ => {}
    }

    Some(entry)
}
