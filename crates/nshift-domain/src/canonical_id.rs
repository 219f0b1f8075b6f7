use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::ResourceKind;

/// A parsed canonical resource identifier.
///
/// Wire form: colon-separated, at least 5 segments, ARN-inspired but not
/// ARN-compliant — the 4th segment is the region, the 5th the account id;
/// everything after the 5th colon is the "resource portion" and is itself
/// slash-separated as `kind/local` or, for container services,
/// `kind/parent/local`.
///
/// Example: `arn:nightshift:ec2:us-east-1:123456789012:instance/i-0abc123`
/// Example: `arn:nightshift:ecs:us-east-1:123456789012:service/prod-cluster/web`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalResourceId {
    raw: String,
    region: String,
    account_id: String,
    kind: ResourceKind,
    parent: Option<String>,
    local_id: String,
}

impl CanonicalResourceId {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() < 5 {
            return Err(DomainError::InvalidResourceIdentifier(raw.to_string()));
        }
        let region = parts[3].to_string();
        let account_id = parts[4].to_string();
        if region.is_empty() || account_id.is_empty() {
            return Err(DomainError::InvalidResourceIdentifier(raw.to_string()));
        }
        let resource_part = parts[5..].join(":");
        if resource_part.is_empty() {
            return Err(DomainError::InvalidResourceIdentifier(raw.to_string()));
        }
        let segs: Vec<&str> = resource_part.splitn(3, '/').collect();
        let (kind_tag, parent, local_id) = match segs.as_slice() {
            [kind] => {
                return Err(DomainError::InvalidResourceIdentifier(format!(
                    "{raw} (missing local id after kind '{kind}')"
                )))
            }
            [kind, local] => (*kind, None, local.to_string()),
            [kind, parent, local] => (*kind, Some(parent.to_string()), local.to_string()),
            _ => unreachable!("splitn(3, ..) yields at most 3 elements"),
        };
        let kind = ResourceKind::from_tag(kind_tag)?;
        Ok(Self { raw: raw.to_string(), region, account_id, kind, parent, local_id })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Parent container id (cluster name) for container-service resources,
    /// recoverable from the canonical id when a separate `clusterId`
    /// attribute is absent.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for CanonicalResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for CanonicalResourceId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CanonicalResourceId> for String {
    fn from(id: CanonicalResourceId) -> Self {
        id.raw
    }
}
