//! Policy manager connector
//!
//! HTTP client obtaining enforcement actions per dataset operation. The
//! decisions are opaque to the controller except for the reserved ids
//! `allow` and `deny`; every other id names a transform the selected
//! module must support.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::ports::{EnforcementAction, PolicyDecisionsRequest, PolicyManager};
use crate::crd::ActionLevel;
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyDecisionsResponse {
    #[serde(default)]
    decision_id: String,
    #[serde(default)]
    result: Vec<PolicyDecision>,
}

/// One decision entry; the policy description that produced it is not
/// consumed by the controller and left unparsed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyDecision {
    action: DecisionAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionAction {
    name: String,
    #[serde(default)]
    level: ActionLevel,
    #[serde(default)]
    args: std::collections::BTreeMap<String, String>,
}

// =============================================================================
// HTTP Policy Manager
// =============================================================================

/// Policy manager client over HTTP
pub struct HttpPolicyManager {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPolicyManager {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// A request without a resource is rejected by the policy manager
/// schema; fail it before it leaves the controller.
fn validate_request(request: &PolicyDecisionsRequest) -> Result<()> {
    if request.resource.name.is_empty() {
        return Err(Error::InvalidPolicyRequest(
            "the request must carry a resource".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl PolicyManager for HttpPolicyManager {
    async fn get_policy_decisions(
        &self,
        request: &PolicyDecisionsRequest,
    ) -> Result<Vec<EnforcementAction>> {
        validate_request(request)?;
        debug!(resource = %request.resource.name, operation = %request.action.action_type,
            location = %request.action.processing_location, "querying the policy manager");

        let response: PolicyDecisionsResponse = self
            .client
            .post(format!("{}/decisions", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(decision = %response.decision_id, count = response.result.len(),
            "received policy decisions");
        Ok(response
            .result
            .into_iter()
            .map(|decision| EnforcementAction {
                id: decision.action.name,
                level: decision.action.level,
                args: decision.action.args,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{OperationType, RequestAction, RequestContext, RequestResource};
    use serde_json::json;

    fn request(resource: &str) -> PolicyDecisionsRequest {
        PolicyDecisionsRequest {
            request_context: RequestContext {
                intent: "fraud-detection".into(),
                role: "data-scientist".into(),
            },
            action: RequestAction {
                action_type: OperationType::Read,
                processing_location: "theshire".into(),
            },
            resource: RequestResource {
                name: resource.into(),
                metadata: Default::default(),
            },
        }
    }

    #[test]
    fn test_request_without_resource_rejected() {
        let err = validate_request(&request("")).unwrap_err();
        assert!(matches!(err, Error::InvalidPolicyRequest(_)));
        assert!(validate_request(&request("s3/allow-dataset")).is_ok());
    }

    #[test]
    fn test_decision_parsing_preserves_id_and_level() {
        let response: PolicyDecisionsResponse = serde_json::from_value(json!({
            "decisionId": "abc-123",
            "result": [
                {
                    "policy": {"policyId": "p1", "description": "redact PII"},
                    "action": {"name": "redact", "level": "column", "args": {"columns": "nameOrig"}}
                },
                {
                    "action": {"name": "allow"}
                }
            ]
        }))
        .unwrap();
        assert_eq!(response.result.len(), 2);
        assert_eq!(response.result[0].action.name, "redact");
        assert_eq!(response.result[0].action.level, ActionLevel::Column);
        assert_eq!(response.result[1].action.level, ActionLevel::Dataset);
    }

    #[test]
    fn test_request_serialization_shape() {
        let value = serde_json::to_value(request("s3/allow-dataset")).unwrap();
        assert_eq!(value["action"]["actionType"], "read");
        assert_eq!(value["action"]["processingLocation"], "theshire");
        assert_eq!(value["resource"]["name"], "s3/allow-dataset");
        assert_eq!(value["requestContext"]["intent"], "fraud-detection");
    }
}
