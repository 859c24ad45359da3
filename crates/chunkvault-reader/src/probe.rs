//! Probe Engine - Per-Node Network Condition Tracking
//!
//! For every node URL in the manifest the engine keeps three sliding
//! windows:
//!
//! - **Latency** (window 10): wall-clock duration of each probe.
//! - **Reliability** (window 20): 1 per success, 0 per error or timeout.
//! - **Bandwidth** (window 10): measured opportunistically from successful
//!   chunk downloads; a 50 Mb/s seed stands in until the first measurement.
//!
//! The per-node score is computed on demand:
//!
//! ```text
//! score = mean(bandwidth) * mean(reliability) / (1 + mean(latency_ms) * 0.1)
//! ```
//!
//! The 0.1 constant gives a soft preference for low latency without letting
//! a single outlier dominate. Nodes whose reliability window is entirely
//! zero are demoted: skipped at selection unless no alternative exists.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use chunkvault_core::NodeUrl;

use crate::client::NodeClient;
use crate::config::ReaderConfig;

/// Latency dampening constant in the score denominator.
const LATENCY_WEIGHT: f64 = 0.1;

#[derive(Debug)]
struct NodeWindows {
    latency_ms: VecDeque<f64>,
    reliability: VecDeque<f64>,
    bandwidth_mbps: VecDeque<f64>,
    /// Downloads currently running against this node.
    in_flight: usize,
    /// Times this node has been selected, for round-robin tie-breaks.
    selections: u64,
}

impl NodeWindows {
    fn new() -> Self {
        Self {
            latency_ms: VecDeque::new(),
            reliability: VecDeque::new(),
            bandwidth_mbps: VecDeque::new(),
            in_flight: 0,
            selections: 0,
        }
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

fn mean(window: &VecDeque<f64>) -> Option<f64> {
    if window.is_empty() {
        None
    } else {
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }
}

/// Point-in-time view of one node's condition.
#[derive(Debug, Clone)]
pub struct NodeCondition {
    pub node_url: NodeUrl,
    pub mean_latency_ms: Option<f64>,
    pub reliability: f64,
    pub mean_bandwidth_mbps: f64,
    pub score: f64,
    pub in_flight: usize,
}

/// Tracks windows for every candidate node and computes selection scores.
pub struct ProbeEngine {
    windows: Mutex<HashMap<NodeUrl, NodeWindows>>,
    config: ReaderConfig,
}

impl ProbeEngine {
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Make every node known to the engine before the first probe lands.
    pub async fn register_nodes(&self, nodes: &[NodeUrl]) {
        let mut windows = self.windows.lock().await;
        for node in nodes {
            windows.entry(node.clone()).or_insert_with(NodeWindows::new);
        }
    }

    pub async fn record_probe_success(&self, node: &NodeUrl, latency_ms: f64) {
        let mut windows = self.windows.lock().await;
        let w = windows.entry(node.clone()).or_insert_with(NodeWindows::new);
        push_bounded(&mut w.latency_ms, latency_ms, self.config.latency_window);
        push_bounded(&mut w.reliability, 1.0, self.config.reliability_window);
    }

    pub async fn record_probe_failure(&self, node: &NodeUrl) {
        let mut windows = self.windows.lock().await;
        let w = windows.entry(node.clone()).or_insert_with(NodeWindows::new);
        push_bounded(&mut w.reliability, 0.0, self.config.reliability_window);
    }

    /// Bandwidth feedback from a successful chunk download.
    pub async fn record_bandwidth(&self, node: &NodeUrl, mbps: f64) {
        let mut windows = self.windows.lock().await;
        let w = windows.entry(node.clone()).or_insert_with(NodeWindows::new);
        push_bounded(&mut w.bandwidth_mbps, mbps, self.config.bandwidth_window);
    }

    /// Download outcomes feed the reliability window too.
    pub async fn record_download_result(&self, node: &NodeUrl, ok: bool) {
        let mut windows = self.windows.lock().await;
        let w = windows.entry(node.clone()).or_insert_with(NodeWindows::new);
        push_bounded(
            &mut w.reliability,
            if ok { 1.0 } else { 0.0 },
            self.config.reliability_window,
        );
    }

    pub async fn begin_download(&self, node: &NodeUrl) {
        let mut windows = self.windows.lock().await;
        windows
            .entry(node.clone())
            .or_insert_with(NodeWindows::new)
            .in_flight += 1;
    }

    pub async fn end_download(&self, node: &NodeUrl) {
        let mut windows = self.windows.lock().await;
        if let Some(w) = windows.get_mut(node) {
            w.in_flight = w.in_flight.saturating_sub(1);
        }
    }

    pub async fn record_selection(&self, node: &NodeUrl) {
        let mut windows = self.windows.lock().await;
        windows
            .entry(node.clone())
            .or_insert_with(NodeWindows::new)
            .selections += 1;
    }

    fn score_of(&self, w: &NodeWindows) -> f64 {
        let bandwidth = mean(&w.bandwidth_mbps).unwrap_or(self.config.bandwidth_seed_mbps);
        let reliability = mean(&w.reliability).unwrap_or(1.0);
        let latency = mean(&w.latency_ms).unwrap_or(0.0);
        bandwidth * reliability / (1.0 + latency * LATENCY_WEIGHT)
    }

    /// Score one node.
    pub async fn score(&self, node: &NodeUrl) -> f64 {
        let windows = self.windows.lock().await;
        windows.get(node).map(|w| self.score_of(w)).unwrap_or(0.0)
    }

    /// A node is demoted when its reliability window is non-empty and all
    /// zero, or when it is already saturated with its own downloads.
    pub async fn is_demoted(&self, node: &NodeUrl) -> bool {
        let windows = self.windows.lock().await;
        match windows.get(node) {
            Some(w) => {
                let dead = !w.reliability.is_empty() && w.reliability.iter().all(|&r| r == 0.0);
                dead || w.in_flight > 0
            }
            None => false,
        }
    }

    /// Scores, selection counts, and demotion flags for a candidate list,
    /// in one lock acquisition.
    pub async fn candidate_view(&self, candidates: &[NodeUrl]) -> Vec<(NodeUrl, f64, u64, bool)> {
        let windows = self.windows.lock().await;
        candidates
            .iter()
            .map(|node| match windows.get(node) {
                Some(w) => {
                    let dead = !w.reliability.is_empty() && w.reliability.iter().all(|&r| r == 0.0);
                    (
                        node.clone(),
                        self.score_of(w),
                        w.selections,
                        dead || w.in_flight > 0,
                    )
                }
                None => (node.clone(), 0.0, 0, false),
            })
            .collect()
    }

    /// Conditions for every tracked node, for logging and stats.
    pub async fn conditions(&self) -> Vec<NodeCondition> {
        let windows = self.windows.lock().await;
        let mut out: Vec<NodeCondition> = windows
            .iter()
            .map(|(node, w)| NodeCondition {
                node_url: node.clone(),
                mean_latency_ms: mean(&w.latency_ms),
                reliability: mean(&w.reliability).unwrap_or(1.0),
                mean_bandwidth_mbps: mean(&w.bandwidth_mbps)
                    .unwrap_or(self.config.bandwidth_seed_mbps),
                score: self.score_of(w),
                in_flight: w.in_flight,
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        out
    }

    /// Spawn one prober task per node, each firing every probe interval
    /// until aborted. Returns the handles for cancellation.
    pub fn spawn_probers(
        self: Arc<Self>,
        nodes: Vec<NodeUrl>,
        client: Arc<dyn NodeClient>,
    ) -> Vec<JoinHandle<()>> {
        nodes
            .into_iter()
            .map(|node| {
                let engine = self.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    let interval = engine.config.probe_interval;
                    let deadline = engine.config.probe_deadline;
                    loop {
                        let started = Instant::now();
                        match client.probe(node.as_str(), deadline).await {
                            Ok(()) => {
                                let latency = started.elapsed().as_secs_f64() * 1000.0;
                                engine.record_probe_success(&node, latency).await;
                                debug!(node = %node, latency_ms = latency, "Probe ok");
                            }
                            Err(e) => {
                                engine.record_probe_failure(&node).await;
                                warn!(node = %node, error = %e, "Probe failed");
                            }
                        }
                        tokio::time::sleep(interval).await;
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ProbeEngine {
        ProbeEngine::new(ReaderConfig::default())
    }

    fn node(name: &str) -> NodeUrl {
        NodeUrl::new(format!("http://{name}:8081"))
    }

    // ---------------------------------------------------------------
    // Score formula
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_score_formula_exact() {
        let e = engine();
        let n = node("a");
        e.record_probe_success(&n, 10.0).await;
        e.record_bandwidth(&n, 100.0).await;
        // 100 * 1.0 / (1 + 10 * 0.1) = 50
        let score = e.score(&n).await;
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_score_uses_bandwidth_seed_before_measurement() {
        let e = engine();
        let n = node("a");
        e.record_probe_success(&n, 0.0).await;
        // 50 (seed) * 1.0 / 1.0 = 50
        assert!((e.score(&n).await - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unreliable_node_scores_lower() {
        let e = engine();
        let good = node("good");
        let flaky = node("flaky");
        for _ in 0..10 {
            e.record_probe_success(&good, 30.0).await;
        }
        for i in 0..10 {
            if i % 2 == 0 {
                e.record_probe_success(&flaky, 30.0).await;
            } else {
                e.record_probe_failure(&flaky).await;
            }
        }
        assert!(e.score(&good).await > e.score(&flaky).await);
    }

    #[tokio::test]
    async fn test_low_latency_beats_high_latency() {
        let e = engine();
        let fast = node("fast");
        let slow = node("slow");
        for _ in 0..5 {
            e.record_probe_success(&fast, 10.0).await;
            e.record_probe_success(&slow, 100.0).await;
        }
        assert!(e.score(&fast).await > e.score(&slow).await);
    }

    // ---------------------------------------------------------------
    // Windows
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_latency_window_caps_at_ten() {
        let e = engine();
        let n = node("a");
        // Ten high-latency probes pushed out by ten fast ones.
        for _ in 0..10 {
            e.record_probe_success(&n, 1000.0).await;
        }
        for _ in 0..10 {
            e.record_probe_success(&n, 10.0).await;
        }
        // Window now holds only the 10ms samples: 50 * 1 / 2 = 25.
        assert!((e.score(&n).await - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_demotion_on_all_zero_reliability() {
        let e = engine();
        let n = node("dead");
        for _ in 0..5 {
            e.record_probe_failure(&n).await;
        }
        assert!(e.is_demoted(&n).await);
        // One success lifts the demotion.
        e.record_probe_success(&n, 20.0).await;
        assert!(!e.is_demoted(&n).await);
    }

    #[tokio::test]
    async fn test_in_flight_download_demotes() {
        let e = engine();
        let n = node("busy");
        e.record_probe_success(&n, 10.0).await;
        e.begin_download(&n).await;
        assert!(e.is_demoted(&n).await);
        e.end_download(&n).await;
        assert!(!e.is_demoted(&n).await);
    }

    #[tokio::test]
    async fn test_unknown_node_scores_zero() {
        let e = engine();
        assert_eq!(e.score(&node("never-seen")).await, 0.0);
    }

    #[tokio::test]
    async fn test_registered_node_not_demoted() {
        let e = engine();
        let n = node("fresh");
        e.register_nodes(std::slice::from_ref(&n)).await;
        assert!(!e.is_demoted(&n).await);
    }
}
