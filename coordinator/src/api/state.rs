use std::sync::Arc;
use std::time::Instant;

use health::HealthRegistry;

use crate::binctl::BinaryController;
use crate::config::Config;
use crate::eps::EpsPlanner;
use crate::metrics::MetricsCollector;
use crate::registry::NodeRegistry;
use crate::reset::ResetOrchestrator;
use crate::shell::RemoteShell;

/// Everything a handler needs, held by reference behind `Arc` — the state owns no
/// state of its own beyond this bundle and the process start time.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<NodeRegistry>,
    pub shell: RemoteShell,
    pub binctl: Arc<BinaryController>,
    pub eps: Arc<EpsPlanner>,
    pub metrics: Arc<MetricsCollector>,
    pub reset: Arc<ResetOrchestrator>,
    pub health: Arc<HealthRegistry>,
    pub started_at: Instant,
}
