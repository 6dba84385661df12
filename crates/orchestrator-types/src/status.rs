//! Entity state machines. Statuses travel over the wire as small integers
//! (`LogData.status`), so every enum here round-trips through `i32` rather
//! than a string tag.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown status code {0}")]
pub struct UnknownStatus(pub i32);

macro_rules! int_status_enum {
    ($name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "i32", into = "i32")]
        pub enum $name {
            $($variant),+
        }

        impl From<$name> for i32 {
            fn from(s: $name) -> i32 {
                match s {
                    $($name::$variant => $value),+
                }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = UnknownStatus;
            fn try_from(v: i32) -> Result<Self, Self::Error> {
                match v {
                    $($value => Ok($name::$variant),)+
                    other => Err(UnknownStatus(other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:?}", self)
            }
        }
    };
}

int_status_enum!(DeploymentStatus {
    Unknown = 0,
    Submitted = 1,
    Pending = 2,
    Scheduled = 3,
    Assigned = 4,
    InDeployment = 5,
    Deployed = 6,
    Failed = 7,
    Redeployed = 8,
    Terminated = 9,
});

int_status_enum!(KernelStatus {
    Submitted = 1,
    Pending = 2,
    Assigned = 4,
    InDeployment = 5,
    Deployed = 6,
    Finished = 10,
    Failed = 7,
});

int_status_enum!(AssignmentStatus {
    Created = 0,
    Scheduled = 3,
    InDeployment = 5,
    Deployed = 6,
    Failed = 7,
    Terminated = 9,
});

int_status_enum!(BundleStatus {
    Created = 0,
    Successful = 6,
    Failed = 7,
    Terminated = 9,
    HpcDataToGatewayRequested = 20,
    HpcDataToGatewayCompleted = 21,
    HpcDataToGatewayFailed = 22,
    HpcExecutionRequesting = 23,
    HpcExecutionSubmitted = 24,
    HpcExecutionCompleted = 25,
    HpcExecutionFailed = 26,
    HpcResultsTransferCompleted = 27,
    HpcResultsTransferFailed = 28,
});

int_status_enum!(StoragePolicyStatus {
    Submitted = 1,
    Pending = 2,
    Scheduled = 3,
    Created = 6,
    Failed = 7,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_status_roundtrips_through_json() {
        let s = DeploymentStatus::Deployed;
        let encoded = serde_json::to_string(&s).unwrap();
        assert_eq!(encoded, "6");
        let decoded: DeploymentStatus = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, DeploymentStatus::Deployed);
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        let err = DeploymentStatus::try_from(999).unwrap_err();
        assert_eq!(err.0, 999);
    }
}
