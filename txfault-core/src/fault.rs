//! # Fault Injection Control Surface
//!
//! Imperative control over replica members. Implementations must not return
//! from a call until the fault has taken effect at the infrastructure level.

use crate::{HarnessError, MemberRole, MemberState, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[async_trait]
pub trait FaultControl: Send + Sync {
    /// Graceful shutdown of a member
    async fn stop(&self, member: &str) -> Result<()>;

    /// Abrupt termination of a member
    async fn kill(&self, member: &str) -> Result<()>;

    /// Freeze a member; its connections stay open but nothing is answered
    async fn pause(&self, member: &str) -> Result<()>;

    /// Isolate members from the network while they keep running
    async fn partition(&self, members: &[String]) -> Result<()>;

    /// Undo every fault on the given members
    async fn restore(&self, members: &[String]) -> Result<()>;

    /// Force the current primary to relinquish its role
    async fn step_down(&self, member: &str) -> Result<()>;

    async fn wait_healthy(&self, member: &str, timeout: Duration) -> bool;

    /// Ordered snapshot of every member. Never cached by callers.
    async fn current_topology(&self) -> Result<Vec<MemberState>>;
}

/// Which members a fault applies to, resolved against a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultTarget {
    Primary,
    /// The first `n` secondaries in topology order
    Secondaries(usize),
    /// The primary plus the first `n` secondaries
    PrimaryAndSecondaries(usize),
    Named(Vec<String>),
}

impl FaultTarget {
    pub fn resolve(&self, topology: &[MemberState]) -> Result<Vec<String>> {
        let primary = || {
            topology
                .iter()
                .find(|m| m.role == MemberRole::Primary)
                .map(|m| m.name.clone())
                .ok_or_else(|| HarnessError::internal("no primary in topology snapshot"))
        };
        let secondaries = |n: usize| -> Result<Vec<String>> {
            let found: Vec<String> = topology
                .iter()
                .filter(|m| m.role == MemberRole::Secondary)
                .take(n)
                .map(|m| m.name.clone())
                .collect();
            if found.len() < n {
                return Err(HarnessError::internal(format!(
                    "wanted {} secondaries, topology has {}",
                    n,
                    found.len()
                )));
            }
            Ok(found)
        };

        match self {
            FaultTarget::Primary => Ok(vec![primary()?]),
            FaultTarget::Secondaries(n) => secondaries(*n),
            FaultTarget::PrimaryAndSecondaries(n) => {
                let mut members = vec![primary()?];
                members.extend(secondaries(*n)?);
                Ok(members)
            }
            FaultTarget::Named(names) => {
                for name in names {
                    if !topology.iter().any(|m| &m.name == name) {
                        return Err(HarnessError::unknown_member(name.clone()));
                    }
                }
                Ok(names.clone())
            }
        }
    }
}

impl fmt::Display for FaultTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultTarget::Primary => write!(f, "primary"),
            FaultTarget::Secondaries(n) => write!(f, "{} secondaries", n),
            FaultTarget::PrimaryAndSecondaries(n) => write!(f, "primary+{} secondaries", n),
            FaultTarget::Named(names) => write!(f, "{}", names.join(",")),
        }
    }
}

/// A single fault to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultAction {
    Stop,
    Kill,
    Pause,
    Partition,
    StepDown,
}

impl FaultAction {
    pub async fn apply(&self, control: &dyn FaultControl, members: &[String]) -> Result<()> {
        match self {
            FaultAction::Partition => control.partition(members).await,
            FaultAction::Stop => {
                for member in members {
                    control.stop(member).await?;
                }
                Ok(())
            }
            FaultAction::Kill => {
                for member in members {
                    control.kill(member).await?;
                }
                Ok(())
            }
            FaultAction::Pause => {
                for member in members {
                    control.pause(member).await?;
                }
                Ok(())
            }
            FaultAction::StepDown => {
                for member in members {
                    control.step_down(member).await?;
                }
                Ok(())
            }
        }
    }

    /// Whether members hit by this action should drop out of the reachable set.
    pub fn makes_unreachable(&self) -> bool {
        !matches!(self, FaultAction::StepDown)
    }
}

impl fmt::Display for FaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultAction::Stop => "stop",
            FaultAction::Kill => "kill",
            FaultAction::Pause => "pause",
            FaultAction::Partition => "partition",
            FaultAction::StepDown => "step-down",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, role: MemberRole) -> MemberState {
        MemberState {
            name: name.to_string(),
            role,
            reachable: !matches!(role, MemberRole::Down | MemberRole::Paused | MemberRole::Unreachable),
        }
    }

    fn topology() -> Vec<MemberState> {
        vec![
            member("m1", MemberRole::Secondary),
            member("m2", MemberRole::Primary),
            member("m3", MemberRole::Secondary),
        ]
    }

    #[test]
    fn test_resolve_by_role() {
        let topology = topology();
        assert_eq!(FaultTarget::Primary.resolve(&topology).unwrap(), vec!["m2"]);
        assert_eq!(
            FaultTarget::Secondaries(2).resolve(&topology).unwrap(),
            vec!["m1", "m3"]
        );
        assert_eq!(
            FaultTarget::PrimaryAndSecondaries(1).resolve(&topology).unwrap(),
            vec!["m2", "m1"]
        );
    }

    #[test]
    fn test_resolve_errors() {
        let topology = topology();
        assert!(FaultTarget::Secondaries(3).resolve(&topology).is_err());
        assert!(matches!(
            FaultTarget::Named(vec!["nope".into()]).resolve(&topology),
            Err(HarnessError::UnknownMember { .. })
        ));

        let headless = vec![member("m1", MemberRole::Secondary)];
        assert!(FaultTarget::Primary.resolve(&headless).is_err());
    }

    #[derive(Default)]
    struct RecordingControl {
        calls: parking_lot::Mutex<Vec<String>>,
    }

    impl RecordingControl {
        fn record(&self, call: String) -> Result<()> {
            self.calls.lock().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl FaultControl for RecordingControl {
        async fn stop(&self, member: &str) -> Result<()> {
            self.record(format!("stop {}", member))
        }
        async fn kill(&self, member: &str) -> Result<()> {
            self.record(format!("kill {}", member))
        }
        async fn pause(&self, member: &str) -> Result<()> {
            self.record(format!("pause {}", member))
        }
        async fn partition(&self, members: &[String]) -> Result<()> {
            self.record(format!("partition {}", members.join(",")))
        }
        async fn restore(&self, members: &[String]) -> Result<()> {
            self.record(format!("restore {}", members.join(",")))
        }
        async fn step_down(&self, member: &str) -> Result<()> {
            self.record(format!("step-down {}", member))
        }
        async fn wait_healthy(&self, _member: &str, _timeout: Duration) -> bool {
            true
        }
        async fn current_topology(&self) -> Result<Vec<MemberState>> {
            Ok(topology())
        }
    }

    #[tokio::test]
    async fn test_apply_fans_out_per_member() {
        let control = RecordingControl::default();
        let members = vec!["m1".to_string(), "m3".to_string()];

        FaultAction::Pause.apply(&control, &members).await.unwrap();
        FaultAction::Partition.apply(&control, &members).await.unwrap();

        let calls = control.calls.lock().clone();
        assert_eq!(calls, vec!["pause m1", "pause m3", "partition m1,m3"]);
        assert!(FaultAction::Pause.makes_unreachable());
        assert!(!FaultAction::StepDown.makes_unreachable());
    }
}
