use std::time::Duration;

use log::{error, info, warn};

use crate::error::ProbeError;
use crate::remote::{ChannelProvider, RemoteTarget};
use crate::waiter::Waiter;

/// Outcome of one status query against the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Target state reached, stop polling.
    Matched,
    /// Still converging, keep polling.
    Pending,
    /// Unrecoverable, stop polling.
    Failed,
}

/// Map a pod phase token to a poll decision. Unknown tokens fail closed so
/// an unexpected cluster state can not spin the loop until timeout.
pub fn classify_pod_phase(phase: &str) -> PollResult {
    match phase {
        // not listed yet, scheduled or going away: keep watching
        "" | "ContainerCreating" | "Terminating" => PollResult::Pending,
        "Running" => PollResult::Matched,
        "Error" => PollResult::Failed,
        other => {
            warn!("{}", ProbeError::UnexpectedState(other.to_string()));
            PollResult::Failed
        }
    }
}

pub fn classify_pvc_phase(phase: &str) -> PollResult {
    match phase {
        "" | "Pending" => PollResult::Pending,
        "Bound" => PollResult::Matched,
        "Lost" => PollResult::Failed,
        other => {
            warn!("{}", ProbeError::UnexpectedState(other.to_string()));
            PollResult::Failed
        }
    }
}

/// Poll until the pod reaches `Running` or the window closes. A transport
/// error or non-zero exit from the status query aborts immediately.
pub async fn wait_for_pod_running(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    pod_name: &str,
    timeout: Duration,
    step: Duration,
) -> bool {
    let command = format!(
        "oc get pods | grep '{}' | grep -v deploy | awk '{{print $3}}'",
        pod_name
    );
    poll_phase(
        provider,
        target,
        &command,
        "pod",
        pod_name,
        classify_pod_phase,
        timeout,
        step,
    )
    .await
}

/// Poll until the claim reaches `Bound` or the window closes.
pub async fn wait_for_pvc_bound(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    claim_name: &str,
    timeout: Duration,
    step: Duration,
) -> bool {
    let command = format!("oc get pvc | grep '{}' | awk '{{print $2}}'", claim_name);
    poll_phase(
        provider,
        target,
        &command,
        "pvc",
        claim_name,
        classify_pvc_phase,
        timeout,
        step,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn poll_phase(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    command: &str,
    resource: &str,
    name: &str,
    classify: fn(&str) -> PollResult,
    timeout: Duration,
    step: Duration,
) -> bool {
    let mut channel = match provider.connect(target).await {
        Ok(channel) => channel,
        Err(err) => {
            error!("cannot poll {} {}: {}", resource, name, err);
            return false;
        }
    };

    let mut matched = false;
    let mut waiter = Waiter::new(timeout, step);
    while waiter.tick().await {
        let output = match channel.run(command).await {
            Ok(output) => output,
            Err(err) => {
                error!("failed to query {} {}: {}", resource, name, err);
                break;
            }
        };
        if !output.success() {
            error!(
                "status query `{}` exited with {}: {}",
                command,
                output.code,
                output.stderr.trim()
            );
            break;
        }
        let phase = first_line(&output.stdout);
        match classify(phase) {
            PollResult::Pending => {
                info!(
                    "{} {} status `{}`, rechecking in {}s",
                    resource,
                    name,
                    phase,
                    step.as_secs()
                );
            }
            PollResult::Matched => {
                info!("{} {} reached `{}`", resource, name, phase);
                matched = true;
                break;
            }
            PollResult::Failed => {
                error!("{} {} in unrecoverable status `{}`", resource, name, phase);
                break;
            }
        }
    }
    channel.close().await;

    if waiter.expired() {
        error!(
            "{} waiting for {} {}",
            ProbeError::Timeout {
                seconds: waiter.timeout().as_secs()
            },
            resource,
            name
        );
        return false;
    }
    matched
}

/// One-shot claim phase query, the raw token as the cluster reports it.
pub async fn get_pvc_status(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    claim_name: &str,
) -> Result<String, ProbeError> {
    let command = format!("oc get pvc | grep '{}' | awk '{{print $2}}'", claim_name);
    let mut channel = provider.connect(target).await?;
    let result = channel.run(&command).await;
    channel.close().await;
    let output = result?;
    if !output.success() {
        return Err(ProbeError::Command {
            command,
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(first_line(&output.stdout).to_string())
}

fn first_line(stdout: &str) -> &str {
    stdout.trim().lines().next().unwrap_or("").trim()
}
