use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::{Domain, InvariantError, Verb};
use crate::ids::{DepartmentId, GrantId, PolicyId, RoleId, TenantId, UserId};
use crate::tenant::ParseEnumError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub tenant_id: TenantId,
    pub parent_id: Option<DepartmentId>,
    pub name: String,
    pub path: String,
    pub attributes: Map<String, Value>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Department {
    pub fn is_top(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDepartment {
    pub tenant_id: TenantId,
    pub parent_id: Option<DepartmentId>,
    pub name: String,
    pub attributes: Map<String, Value>,
}

impl NewDepartment {
    pub fn top(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            parent_id: None,
            name: name.into(),
            attributes: Map::new(),
        }
    }

    pub fn under(tenant_id: TenantId, parent_id: DepartmentId, name: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::top(tenant_id, name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Disabled => "DISABLED",
        }
    }
}

impl FromStr for UserStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "DISABLED" => Ok(Self::Disabled),
            other => Err(ParseEnumError {
                kind: "user status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub status: UserStatus,
}

impl NewUser {
    pub fn new(username: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            full_name: full_name.into(),
            status: UserStatus::Active,
        }
    }
}

/// A role definition. `tenant_id` is `None` for platform roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub code: String,
    pub name: String,
    pub tenant_id: Option<TenantId>,
    pub is_system: bool,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn is_platform(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// Built-in roles can be neither changed nor removed.
    pub fn ensure_mutable(&self) -> Result<(), InvariantError> {
        if self.is_system {
            return Err(InvariantError::SystemRole(self.code.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub code: String,
    pub name: String,
    pub tenant_id: Option<TenantId>,
    pub is_system: bool,
    pub description: String,
}

impl NewRole {
    pub fn platform(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            tenant_id: None,
            is_system: false,
            description: String::new(),
        }
    }

    pub fn tenant(tenant_id: TenantId, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::platform(code, name)
        }
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl RoleUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.is_active.is_none()
    }

    pub fn apply(&self, role: &mut Role, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            role.name = name.clone();
        }
        if let Some(description) = &self.description {
            role.description = description.clone();
        }
        if let Some(active) = self.is_active {
            role.is_active = active;
        }
        role.updated_at = now;
    }
}

/// Links a user to a role. `tenant_id` is `None` for a platform-wide grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: GrantId,
    pub user_id: UserId,
    pub role_id: RoleId,
    pub tenant_id: Option<TenantId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub tenant_id: Option<TenantId>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One row of the policy table: `role_code` may act on `operation` with
/// `method` inside `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: PolicyId,
    pub role_code: String,
    pub domain: Domain,
    pub operation: String,
    pub method: MethodPattern,
}

impl PolicyRule {
    pub fn new(
        id: PolicyId,
        role_code: impl Into<String>,
        domain: Domain,
        operation: impl Into<String>,
        method: MethodPattern,
    ) -> Self {
        Self {
            id,
            role_code: role_code.into(),
            domain,
            operation: operation.into(),
            method,
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p, {}, {}, {}, {}",
            self.role_code, self.domain, self.operation, self.method
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPolicyRule {
    pub role_code: String,
    pub domain: Domain,
    pub operation: String,
    pub method: MethodPattern,
}

impl NewPolicyRule {
    pub fn new(
        role_code: impl Into<String>,
        domain: Domain,
        operation: impl Into<String>,
        method: MethodPattern,
    ) -> Self {
        Self {
            role_code: role_code.into(),
            domain,
            operation: operation.into(),
            method,
        }
    }

    pub fn with_id(self, id: PolicyId) -> PolicyRule {
        PolicyRule {
            id,
            role_code: self.role_code,
            domain: self.domain,
            operation: self.operation,
            method: self.method,
        }
    }
}

/// The method column of a policy rule: one verb class or any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MethodPattern {
    Any,
    Verb(Verb),
}

impl MethodPattern {
    pub fn matches(&self, verb: Verb) -> bool {
        match self {
            Self::Any => true,
            Self::Verb(v) => *v == verb,
        }
    }
}

impl fmt::Display for MethodPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Verb(v) => f.write_str(v.as_str()),
        }
    }
}

impl FromStr for MethodPattern {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::Any);
        }
        s.parse::<Verb>().map(Self::Verb).map_err(|_| ParseEnumError {
            kind: "policy method",
            value: s.to_string(),
        })
    }
}

impl TryFrom<String> for MethodPattern {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MethodPattern> for String {
    fn from(value: MethodPattern) -> Self {
        value.to_string()
    }
}
