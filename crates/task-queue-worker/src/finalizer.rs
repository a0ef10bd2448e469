use crate::broker::Publisher;
use crate::dispatcher::ExecutionOutcome;
use std::fmt;
use std::sync::Arc;
use task_queue_core::TaskSignature;
use tracing::{error, info, warn};

/// Which follow-up list an outcome selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    OnSuccess,
    OnError,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::OnSuccess => write!(f, "OnSuccess"),
            Branch::OnError => write!(f, "OnError"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    pub branch: Branch,
    pub published: usize,
    pub failed: usize,
}

/// Publishes the follow-up chain selected by an execution outcome.
///
/// Exactly one branch is traversed, in list order. A failed publish is
/// logged and the rest of the chain is still attempted.
pub struct Finalizer {
    publisher: Arc<dyn Publisher>,
}

impl Finalizer {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Finalizer { publisher }
    }

    pub async fn finalize(
        &self,
        signature: &TaskSignature,
        outcome: &ExecutionOutcome,
    ) -> FinalizeReport {
        let (branch, follow_ups) = match outcome {
            Ok(value) => {
                info!("Finished processing {}", signature.name);
                info!("Result = {}", value);
                (Branch::OnSuccess, &signature.on_success)
            }
            Err(err) => {
                error!("Failed processing {}", signature.name);
                error!("Error = {}", err);
                (Branch::OnError, &signature.on_error)
            }
        };

        let mut report = FinalizeReport {
            branch,
            published: 0,
            failed: 0,
        };

        for follow_up in follow_ups {
            match self.publisher.publish(follow_up).await {
                Ok(()) => report.published += 1,
                Err(err) => {
                    warn!(
                        task = %signature.name,
                        follow_up = %follow_up.name,
                        %branch,
                        "Failed to publish follow-up task: {}",
                        err
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}
