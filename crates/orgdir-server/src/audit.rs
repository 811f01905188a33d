use orgdir_core::directory::{Department, PolicyRule, UserRole};
use orgdir_core::engine::{Domain, Verb};
use orgdir_core::ids::UserId;
use orgdir_core::tenant::Tenant;

pub fn audit_tenant_created(actor: UserId, tenant: &Tenant) {
    tracing::info!(
        target: "audit",
        event = "tenant_created",
        actor = actor.value(),
        tenant_id = tenant.id.value(),
        tenant_type = tenant.tenant_type.as_str(),
        path = tenant.path.as_str(),
        "tenant created"
    );
}

pub fn audit_tenant_updated(actor: UserId, tenant: &Tenant, fields: &[&str]) {
    tracing::info!(
        target: "audit",
        event = "tenant_updated",
        actor = actor.value(),
        tenant_id = tenant.id.value(),
        fields = fields.join(",").as_str(),
        "tenant updated"
    );
}

pub fn audit_tenant_deleted(actor: UserId, tenant: &Tenant) {
    tracing::info!(
        target: "audit",
        event = "tenant_deleted",
        actor = actor.value(),
        tenant_id = tenant.id.value(),
        "tenant soft-deleted"
    );
}

pub fn audit_department_created(actor: UserId, department: &Department) {
    tracing::info!(
        target: "audit",
        event = "department_created",
        actor = actor.value(),
        tenant_id = department.tenant_id.value(),
        department_id = department.id.value(),
        "department created"
    );
}

pub fn audit_department_deleted(actor: UserId, department: &Department) {
    tracing::info!(
        target: "audit",
        event = "department_deleted",
        actor = actor.value(),
        tenant_id = department.tenant_id.value(),
        department_id = department.id.value(),
        "department deleted"
    );
}

pub fn audit_role_granted(actor: UserId, grant: &UserRole) {
    tracing::info!(
        target: "audit",
        event = "role_granted",
        actor = actor.value(),
        user_id = grant.user_id.value(),
        role_id = grant.role_id.value(),
        tenant_id = %grant.tenant_id.map_or_else(|| "*".to_string(), |t| t.to_string()),
        "role granted"
    );
}

pub fn audit_role_revoked(actor: UserId, grant: &UserRole) {
    tracing::info!(
        target: "audit",
        event = "role_revoked",
        actor = actor.value(),
        user_id = grant.user_id.value(),
        role_id = grant.role_id.value(),
        "role revoked"
    );
}

pub fn audit_policy_changed(actor: UserId, rule: &PolicyRule, change: &str) {
    tracing::info!(
        target: "audit",
        event = "policy_changed",
        actor = actor.value(),
        change = change,
        rule = %rule,
        "policy rule changed"
    );
}

pub fn audit_access_denied(user_id: UserId, domain: Domain, operation: &str, verb: Verb) {
    tracing::warn!(
        target: "audit",
        event = "access_denied",
        user_id = user_id.value(),
        domain = %domain,
        operation = operation,
        verb = verb.as_str(),
        "access denied"
    );
}
