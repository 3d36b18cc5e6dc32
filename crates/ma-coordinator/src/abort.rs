//! Abort Path (spec §7, Testable Property 6): when DiffApply/commit/push
//! fails, purge every outstanding request-stream entry belonging to the
//! failed workflow across all persona consumer groups and the
//! coordination group, then mark the workflow context aborted so no
//! further engine steps run. The coordinator loop then moves on to the
//! next task rather than aborting the whole process.

use ma_core::context::WorkflowContext;
use ma_transport::{StreamId, StreamTransport};

/// Acks and deletes every request-stream entry tagged with `workflow_id`
/// from every registered consumer group, then sets `workflowAborted=true`
/// on `workflow`. Returns the number of entries purged.
pub async fn run_abort_path(
    transport: &dyn StreamTransport,
    request_stream: &str,
    workflow: &WorkflowContext,
) -> usize {
    let entries = match transport.range(request_stream, 0, StreamId::MAX).await {
        Ok(entries) => entries,
        Err(_) => Vec::new(),
    };
    let groups = transport.group_names(request_stream).await;

    let mut purged = 0;
    for entry in &entries {
        let belongs_to_workflow = entry
            .fields
            .get("workflow_id")
            .is_some_and(|id| id == &workflow.workflow_id);
        if !belongs_to_workflow {
            continue;
        }
        for group in &groups {
            let _ = transport.ack(request_stream, group, entry.id).await;
        }
        let _ = transport.delete(request_stream, entry.id).await;
        purged += 1;
    }

    workflow.mark_aborted();
    purged
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_transport::{GroupStart, LocalStreamTransport};
    use std::collections::HashMap;

    fn fields(workflow_id: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("workflow_id".to_string(), workflow_id.to_string());
        m
    }

    #[tokio::test]
    async fn purges_only_entries_for_the_aborted_workflow_and_marks_aborted() {
        let transport = LocalStreamTransport::new();
        transport.group_create("ma:requests", "planner", GroupStart::Zero).await.unwrap();
        transport.group_create("ma:requests", "coordination", GroupStart::Zero).await.unwrap();
        transport.append("ma:requests", fields("wf-abort")).await.unwrap();
        transport.append("ma:requests", fields("wf-other")).await.unwrap();

        let workflow = WorkflowContext::new("wf-abort", "proj1", std::env::temp_dir(), "main");
        let purged = run_abort_path(&transport, "ma:requests", &workflow).await;

        assert_eq!(purged, 1);
        assert!(workflow.is_aborted());

        let remaining = transport.range("ma:requests", 0, u64::MAX).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].fields.get("workflow_id").unwrap(), "wf-other");
    }

    #[tokio::test]
    async fn empty_stream_is_a_no_op_purge() {
        let transport = LocalStreamTransport::new();
        let workflow = WorkflowContext::new("wf1", "proj1", std::env::temp_dir(), "main");
        let purged = run_abort_path(&transport, "ma:requests", &workflow).await;
        assert_eq!(purged, 0);
        assert!(workflow.is_aborted());
    }
}
