use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use orgdir_core::directory::{
    MethodPattern, NewDepartment, NewPolicyRule, NewRole, NewUser, NewUserRole, RoleUpdate,
    UserStatus,
};
use orgdir_core::engine::Domain;
use orgdir_core::ids::{DepartmentId, RoleId, TenantId, UserId};
use orgdir_core::tenant::{NewTenant, TenantField, TenantStatus, TenantType, TenantUpdate};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub owner_id: UserId,
    #[serde(rename = "type")]
    pub tenant_type: TenantType,
    #[serde(default)]
    pub parent_id: Option<TenantId>,
    #[serde(default)]
    pub status: Option<TenantStatus>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl CreateTenantRequest {
    pub fn into_new_tenant(self) -> Result<NewTenant, ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("name must not be empty".to_string()));
        }
        let mut new = NewTenant::new(self.tenant_type, self.name, self.owner_id)
            .with_attributes(self.attributes);
        if let Some(parent) = self.parent_id {
            new = new.with_parent(parent);
        }
        if let Some(status) = self.status {
            new = new.with_status(status);
        }
        new.expired_at = self.expired_at;
        Ok(new)
    }
}

/// Turns a PATCH body into a field list. Structural columns are kept so the
/// engine can refuse them with a specific reason.
pub fn tenant_update_from_json(body: Map<String, Value>) -> Result<TenantUpdate, ApiError> {
    let mut update = TenantUpdate::new();
    for (key, value) in body {
        if let Some(field) = TenantField::protected(&key) {
            update = update.set(field);
            continue;
        }
        let field = match key.as_str() {
            "name" => TenantField::Name(field_value(&key, value)?),
            "owner_id" => TenantField::OwnerId(field_value(&key, value)?),
            "status" => TenantField::Status(field_value(&key, value)?),
            "expired_at" => TenantField::ExpiredAt(field_value(&key, value)?),
            "attributes" => TenantField::Attributes(field_value(&key, value)?),
            other => {
                return Err(ApiError::Validation(format!("unknown field '{other}'")));
            }
        };
        update = update.set(field);
    }
    Ok(update)
}

fn field_value<T: serde::de::DeserializeOwned>(key: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::Validation(format!("invalid value for '{key}': {e}")))
}

#[derive(Debug, Deserialize)]
pub struct CreateDepartmentRequest {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub parent_id: Option<DepartmentId>,
    pub name: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl From<CreateDepartmentRequest> for NewDepartment {
    fn from(req: CreateDepartmentRequest) -> Self {
        let mut new = match req.parent_id {
            Some(parent) => NewDepartment::under(req.tenant_id, parent, req.name),
            None => NewDepartment::top(req.tenant_id, req.name),
        };
        new.attributes = req.attributes;
        new
    }
}

#[derive(Debug, Deserialize)]
pub struct ListDepartmentsQuery {
    pub tenant_id: TenantId,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub status: Option<UserStatus>,
}

impl CreateUserRequest {
    pub fn into_new_user(self) -> Result<NewUser, ApiError> {
        if self.username.trim().is_empty() {
            return Err(ApiError::Validation("username must not be empty".to_string()));
        }
        let mut new = NewUser::new(self.username, self.full_name);
        if let Some(status) = self.status {
            new.status = status;
        }
        Ok(new)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub description: String,
}

impl CreateRoleRequest {
    pub fn into_new_role(self) -> Result<NewRole, ApiError> {
        if self.code.trim().is_empty() || self.code.contains(char::is_whitespace) {
            return Err(ApiError::Validation(
                "code must be non-empty and contain no whitespace".to_string(),
            ));
        }
        let mut new = match self.tenant_id {
            Some(tenant) => NewRole::tenant(tenant, self.code, self.name),
            None => NewRole::platform(self.code, self.name),
        };
        new.description = self.description;
        Ok(new)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl From<UpdateRoleRequest> for RoleUpdate {
    fn from(req: UpdateRoleRequest) -> Self {
        RoleUpdate {
            name: req.name,
            description: req.description,
            is_active: req.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantRoleRequest {
    pub user_id: UserId,
    pub role_id: RoleId,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<GrantRoleRequest> for NewUserRole {
    fn from(req: GrantRoleRequest) -> Self {
        NewUserRole {
            user_id: req.user_id,
            role_id: req.role_id,
            tenant_id: req.tenant_id,
            expires_at: req.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddPolicyRequest {
    pub role_code: String,
    pub domain: Domain,
    pub operation: String,
    pub method: MethodPattern,
}

impl AddPolicyRequest {
    pub fn into_new_rule(self) -> Result<NewPolicyRule, ApiError> {
        if self.role_code.is_empty() || self.operation.is_empty() {
            return Err(ApiError::Validation(
                "role_code and operation must not be empty".to_string(),
            ));
        }
        Ok(NewPolicyRule::new(
            self.role_code,
            self.domain,
            self.operation,
            self.method,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
