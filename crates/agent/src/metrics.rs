use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec_with_registry, Encoder, IntCounterVec, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref TOOL_CALLS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "kubectl_agent_tool_calls_total",
        "Tool calls dispatched, by tool and outcome.",
        &["tool", "outcome"],
        REGISTRY
    )
    .unwrap();
    pub static ref INFERENCE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "kubectl_agent_inference_requests_total",
        "Inference attempts, by outcome.",
        &["outcome"],
        REGISTRY
    )
    .unwrap();
    pub static ref COMMANDS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "kubectl_agent_commands_total",
        "kubectl commands executed, by safety classification.",
        &["classification"],
        REGISTRY
    )
    .unwrap();
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "kubectl_agent_sessions_total",
        "Handled utterances, by final answer kind.",
        &["outcome"],
        REGISTRY
    )
    .unwrap();
}

// Function to gather metrics for exposition
pub fn gather_metrics() -> crate::Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::Error::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}
