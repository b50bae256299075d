//! Instance names for namespacing cache keys across tenants
//!

use std::fmt;

use tonic::Status;

type Result<T, E = Status> = std::result::Result<T, E>;

/// Path components which may not appear in an instance name because they
/// collide with resource-name segments of the Remote Execution API.
const RESERVED_KEYWORDS: &[&str] = &[
    "blobs",
    "uploads",
    "actions",
    "actionResults",
    "operations",
    "capabilities",
];

/// A validated instance name. The empty instance name is valid and names the
/// default tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InstanceName(String);

impl InstanceName {
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Ok(Self(String::new()));
        }
        for component in name.split('/') {
            if component.is_empty() {
                return Err(Status::invalid_argument(format!(
                    "invalid instance name {:?}: empty path component",
                    name
                )));
            }
            if RESERVED_KEYWORDS.contains(&component) {
                return Err(Status::invalid_argument(format!(
                    "invalid instance name {:?}: reserved path component {:?}",
                    name, component
                )));
            }
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
