//! Debug tracer: periodic, observation-only ring diagnostics.
//!
//! When a dispatcher is spawned with `debug_tracer`, one extra task
//! samples the link about once per second and emits a single structured
//! line per sample: the four indices, the derived queue lengths, both
//! park-gate flags, the index-lock flag, and the closed latch. All
//! observations are plain atomic loads (plus one short lock acquisition
//! for a consistent index snapshot); the tracer never perturbs the
//! protocol.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::link::EventLink;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) async fn run<P, A>(link: Arc<EventLink<P, A>>, token: CancellationToken)
where
    P: Send + Sync + 'static,
    A: Send + 'static,
{
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(SAMPLE_INTERVAL) => {}
        }

        let ring = link.ring();
        // Sample the lock flag before taking the lock for the snapshot,
        // otherwise the tracer would only ever report itself.
        let state_held = ring.state_held();
        let snapshot = link.snapshot().await;

        debug!(
            target: "evlink::tracer",
            link = %link.name(),
            reserved_head = snapshot.reserved_head,
            head = snapshot.head,
            tail = snapshot.tail,
            reserved_tail = snapshot.reserved_tail,
            committed = snapshot.committed_len(),
            reserved = snapshot.reserved_len(),
            full_parked = ring.full_gate_engaged(),
            empty_parked = ring.empty_gate_engaged(),
            state_held,
            closed = ring.is_closed(),
            "ring sample"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_tracer_exits_on_cancellation() {
        let link = Arc::new(EventLink::<u32>::new("traced"));
        let token = CancellationToken::new();

        let tracer = tokio::spawn(run(link, token.clone()));
        token.cancel();

        timeout(Duration::from_millis(500), tracer)
            .await
            .expect("tracer should exit promptly once cancelled")
            .unwrap();
    }
}
