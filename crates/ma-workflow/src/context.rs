//! Engine Context: wraps `ma_core::context::WorkflowContext` with the
//! collaborators step implementations need (transport, VCS, task client).
//!
//! `ma_core::context::WorkflowContext` deliberately carries only the
//! literal per-invocation data model from spec §3 (variables, step
//! outputs, abort flag) and no transport/VCS handles, so `ma-core` stays
//! free of a dependency on `ma-transport`/`ma-vcs`. This type is the
//! engine-level join of that data model with the live collaborators,
//! analogous to how `csa-session`'s session state is paired with a
//! separately-owned `git`/transport handle by its caller rather than
//! carrying one itself.

use std::sync::Arc;

use ma_core::context::WorkflowContext;
use ma_task_client::TaskServiceClient;
use ma_transport::StreamTransport;
use ma_vcs::driver::VcsDriver;

#[derive(Clone)]
pub struct EngineContext {
    pub workflow: WorkflowContext,
    pub transport: Arc<dyn StreamTransport>,
    pub vcs: Arc<VcsDriver>,
    pub task_client: Option<Arc<TaskServiceClient>>,
    pub request_stream: String,
    pub event_stream: String,
    pub engine_persona_name: String,
    /// Test/CI bypass (§4.10 PersonaRequestStep): synthesize a pass result
    /// instead of round-tripping through the transport and an LM client.
    pub skip_persona_operations: bool,
    pub default_deadline_s: u64,
}

impl EngineContext {
    pub fn new(
        workflow: WorkflowContext,
        transport: Arc<dyn StreamTransport>,
        vcs: Arc<VcsDriver>,
        task_client: Option<Arc<TaskServiceClient>>,
    ) -> Self {
        Self {
            workflow,
            transport,
            vcs,
            task_client,
            request_stream: "ma:requests".to_string(),
            event_stream: "ma:events".to_string(),
            engine_persona_name: "engine".to_string(),
            skip_persona_operations: false,
            default_deadline_s: 900,
        }
    }
}
