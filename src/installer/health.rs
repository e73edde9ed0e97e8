use std::time::Duration;

use crate::ssh::{AuthMethod, RunOptions, SshExecutor, SshTarget};
use crate::store::model::ServiceHealth;
use crate::templates::{HealthCheck, HealthCheckKind};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProbeResult {
    pub kind: String,
    pub target: String,
    pub passed: bool,
    pub detail: Option<String>,
}

pub struct HealthPollResult {
    pub overall: ServiceHealth,
    pub checks: Vec<ProbeResult>,
}

/// Polls every declared health probe with exponential backoff until either
/// all succeed or the deadline elapses (§4.5). The first success per probe
/// marks that probe healthy; the overall result is healthy only if every
/// probe succeeded at least once before the deadline.
pub async fn poll_health(probes: &[HealthCheck], ssh: &std::sync::Arc<dyn SshExecutor>, target: &SshTarget) -> HealthPollResult {
    if probes.is_empty() {
        return HealthPollResult {
            overall: ServiceHealth::Unknown,
            checks: Vec::new(),
        };
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    let mut results = Vec::with_capacity(probes.len());

    for probe in probes {
        let mut backoff = Duration::from_millis(500);
        let mut last: Option<ProbeResult> = None;
        loop {
            let result = run_probe(probe, ssh, target).await;
            let passed = result.passed;
            last = Some(result);
            if passed || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(15));
        }
        results.push(last.expect("at least one probe attempt always runs"));
    }

    let overall = if results.iter().all(|r| r.passed) {
        ServiceHealth::Healthy
    } else {
        ServiceHealth::Unhealthy
    };

    HealthPollResult { overall, checks: results }
}

async fn run_probe(probe: &HealthCheck, ssh: &std::sync::Arc<dyn SshExecutor>, target: &SshTarget) -> ProbeResult {
    let (passed, detail) = match probe.kind {
        HealthCheckKind::Tcp => {
            let cmd = format!("timeout 3 bash -c 'cat < /dev/null > /dev/tcp/{}' 2>/dev/null", probe.target.replace(':', "/"));
            match ssh.run(target, &AuthMethod::Agent, &cmd, RunOptions::default()).await {
                Ok(out) => (out.exit_code == 0, None),
                Err(e) => (false, Some(e.message)),
            }
        }
        HealthCheckKind::Http => {
            let cmd = format!("curl -fsS -o /dev/null -w '%{{http_code}}' --max-time 5 {}", probe.target);
            match ssh.run(target, &AuthMethod::Agent, &cmd, RunOptions::default()).await {
                Ok(out) => {
                    let code = out.stdout_string();
                    let expected = probe.expected.as_deref().unwrap_or("200");
                    (code.trim() == expected, Some(code))
                }
                Err(e) => (false, Some(e.message)),
            }
        }
        HealthCheckKind::Command => match ssh.run(target, &AuthMethod::Agent, &probe.target, RunOptions::default()).await {
            Ok(out) => {
                let passed = match &probe.expected {
                    Some(expected) => out.stdout_string().trim() == expected.trim(),
                    None => out.exit_code == 0,
                };
                (passed, Some(out.stdout_string()))
            }
            Err(e) => (false, Some(e.message)),
        },
    };

    ProbeResult {
        kind: format!("{:?}", probe.kind).to_lowercase(),
        target: probe.target.clone(),
        passed,
        detail,
    }
}
