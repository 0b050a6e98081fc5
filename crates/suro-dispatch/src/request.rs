// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job request generation.
//!
//! A run becomes three input files plus one parameter:
//!
//! | Name            | Content                                           |
//! |-----------------|---------------------------------------------------|
//! | `model.mod`     | model script                                      |
//! | `model.ops`     | solver settings (time limit, target gap)          |
//! | `model.dat`     | data set followed by the run's parameters         |
//! | `suro.template` | template id (job parameter)                       |

use serde_json::Value;
use suro_store::{Parameter, Run};
use tokio::sync::mpsc;

use crate::backend::{JobInput, JobRequest};

/// Model script input name.
pub const MODEL_INPUT: &str = "model.mod";
/// Solver settings input name.
pub const SETTINGS_INPUT: &str = "model.ops";
/// Data input name.
pub const DATA_INPUT: &str = "model.dat";
/// Job parameter carrying the template id.
pub const TEMPLATE_PARAMETER: &str = "suro.template";

/// Solver settings document: time limit (seconds) and relative gap.
pub fn settings_xml(run: &Run) -> String {
    let time_limit = u64::from(run.max_run_time) * 60;
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <settings version=\"2\"><category name=\"cplex\">\n\
         <setting name=\"tilim\" value=\"{time_limit}\"/>\n\
         <setting name=\"epgap\" value=\"{}\"/>\n\
         </category></settings>",
        run.min_gap
    )
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))),
        Value::Array(items) => {
            let items: Vec<_> = items.iter().filter_map(render_value).collect();
            Some(format!("[{}]", items.join(", ")))
        }
        Value::Object(fields) => {
            let fields: Vec<_> = fields.values().filter_map(render_value).collect();
            Some(format!("<{}>", fields.join(", ")))
        }
    }
}

/// Data-file assignments for every parameter with a value.
///
/// Strings are quoted, booleans become `0`/`1`, arrays become `[..]` and
/// objects become tuples `<..>` of their values.
pub fn parameter_block(parameters: &[Parameter]) -> String {
    let mut block = String::new();
    for parameter in parameters {
        if let Some(value) = render_value(&parameter.value) {
            block.push_str(&format!("{} = {};\n", parameter.name, value));
        }
    }
    block
}

/// Data file: the data set followed by the parameter block.
pub fn data_file(data_set: &str, parameters: &[Parameter]) -> String {
    let mut dat = data_set.to_string();
    if !dat.is_empty() && !dat.ends_with('\n') {
        dat.push('\n');
    }
    dat.push_str(&parameter_block(parameters));
    dat
}

/// Assemble the job request for a run.
pub fn build_request(
    run: &Run,
    model_script: &str,
    data_set: &str,
    live_log: Option<mpsc::UnboundedSender<String>>,
) -> JobRequest {
    JobRequest {
        parameters: vec![(TEMPLATE_PARAMETER.to_string(), run.template_id.clone())],
        inputs: vec![
            JobInput::new(MODEL_INPUT, model_script),
            JobInput::new(SETTINGS_INPUT, settings_xml(run)),
            JobInput::new(DATA_INPUT, data_file(data_set, &run.parameters)),
        ],
        live_log,
    }
}
