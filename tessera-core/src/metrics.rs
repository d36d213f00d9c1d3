use std::sync::OnceLock;

use ::metrics::{
    Label, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};

use crate::invocation::InvocationResult;

static METRICS_INIT: OnceLock<bool> = OnceLock::new();

/// Lazily describes all the metrics used in this module once
pub fn lazy_init() {
    METRICS_INIT.get_or_init(|| {
        describe_counter!("tessera.requests", "number of model invocations");
        describe_counter!("tessera.usage.input_tokens", "token usage for the prompt");
        describe_counter!("tessera.usage.output_tokens", "token usage for the response");
        describe_gauge!("tessera.cost.input_dollars", "cumulative input cost in dollars");
        describe_gauge!("tessera.cost.output_dollars", "cumulative output cost in dollars");
        describe_gauge!("tessera.cost.total_dollars", "cumulative total cost in dollars");
        describe_histogram!("tessera.latency_ms", "time to last token in milliseconds");
        true
    });
}

/// Emits usage, cost and latency of an invocation, labelled by function and model
pub fn emit_invocation(function_name: &str, model_name: &str, result: &InvocationResult) {
    let labels = vec![
        Label::new("function_name", function_name.to_string()),
        Label::new("model_name", model_name.to_string()),
    ];

    lazy_init();
    counter!("tessera.requests", labels.iter()).increment(1);
    counter!("tessera.usage.input_tokens", labels.iter()).increment(result.input_tokens);
    counter!("tessera.usage.output_tokens", labels.iter()).increment(result.output_tokens);
    gauge!("tessera.cost.input_dollars", labels.iter()).increment(result.input_cost);
    gauge!("tessera.cost.output_dollars", labels.iter()).increment(result.output_cost);
    gauge!("tessera.cost.total_dollars", labels.iter()).increment(result.total_cost);
    histogram!("tessera.latency_ms", labels.iter())
        .record(result.time_to_last_token.as_secs_f64() * 1000.0);
}
