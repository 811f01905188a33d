use std::fmt;

use serde::Serialize;

use crate::ids::TenantId;

/// Session value that marks the platform scope inside the storage session.
pub const PLATFORM_SESSION_VALUE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("missing tenant identity")]
    Missing,
    #[error("malformed tenant identity '{0}'")]
    Malformed(String),
}

/// The tenant a request acts in. Tenant id `0` on the wire is the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "i64")]
pub enum TenantScope {
    Platform,
    Tenant(TenantId),
}

impl TenantScope {
    pub fn from_id(id: i64) -> Self {
        if id == 0 {
            Self::Platform
        } else {
            Self::Tenant(TenantId::new(id))
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ScopeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::Missing);
        }
        match trimmed.parse::<i64>() {
            Ok(id) if id >= 0 => Ok(Self::from_id(id)),
            _ => Err(ScopeError::Malformed(raw.to_string())),
        }
    }

    pub fn from_declared(declared: Option<&str>) -> Result<Self, ScopeError> {
        declared.map_or(Err(ScopeError::Missing), Self::parse)
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Self::Platform => None,
            Self::Tenant(id) => Some(*id),
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, Self::Platform)
    }

    /// Whether a row owned by `owner` (`None` for platform rows) may be
    /// written from this scope. A tenant scope reads platform rows but
    /// writes only its own.
    pub fn can_write(&self, owner: Option<TenantId>) -> bool {
        match self {
            Self::Platform => true,
            Self::Tenant(id) => owner == Some(*id),
        }
    }

    /// Value written to `app.current_tenant` for this scope.
    pub fn session_value(&self) -> String {
        match self {
            Self::Platform => PLATFORM_SESSION_VALUE.to_string(),
            Self::Tenant(id) => id.to_string(),
        }
    }
}

impl From<TenantScope> for i64 {
    fn from(scope: TenantScope) -> Self {
        scope.tenant_id().map_or(0, |id| id.value())
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform => f.write_str("platform"),
            Self::Tenant(id) => write!(f, "tenant {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_platform() {
        assert_eq!(TenantScope::parse("0").unwrap(), TenantScope::Platform);
        assert_eq!(TenantScope::Platform.session_value(), "*");
    }

    #[test]
    fn positive_id_is_tenant() {
        let scope = TenantScope::parse(" 42 ").unwrap();
        assert_eq!(scope, TenantScope::Tenant(TenantId::new(42)));
        assert_eq!(scope.session_value(), "42");
        assert_eq!(scope.tenant_id(), Some(TenantId::new(42)));
    }

    #[test]
    fn absent_or_blank_identity_is_missing() {
        assert_eq!(TenantScope::from_declared(None), Err(ScopeError::Missing));
        assert_eq!(TenantScope::from_declared(Some("  ")), Err(ScopeError::Missing));
    }

    #[test]
    fn non_numeric_and_negative_are_malformed() {
        assert_eq!(
            TenantScope::parse("acme"),
            Err(ScopeError::Malformed("acme".into()))
        );
        assert_eq!(
            TenantScope::parse("-3"),
            Err(ScopeError::Malformed("-3".into()))
        );
    }

    #[test]
    fn tenant_scope_writes_only_its_own_rows() {
        let a = TenantId::new(7);
        let scope = TenantScope::Tenant(a);
        assert!(scope.can_write(Some(a)));
        assert!(!scope.can_write(None));
        assert!(!scope.can_write(Some(TenantId::new(8))));
        assert!(TenantScope::Platform.can_write(None));
        assert!(TenantScope::Platform.can_write(Some(a)));
    }

    #[test]
    fn serializes_as_wire_id() {
        assert_eq!(serde_json::to_value(TenantScope::Platform).unwrap(), 0);
        assert_eq!(
            serde_json::to_value(TenantScope::Tenant(TenantId::new(9))).unwrap(),
            9
        );
    }
}
