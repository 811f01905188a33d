use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::directory::PolicyRule;
use crate::ids::TenantId;
use crate::scope::TenantScope;
use crate::tenant::ParseEnumError;

use super::{EngineError, PolicyReader, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Classifies an operation name by the prefix of its final path segment.
    /// Anything unrecognised counts as an update.
    pub fn infer(operation: &str) -> Verb {
        let last = operation
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or_default()
            .to_ascii_lowercase();

        const PREFIXES: [(&str, Verb); 9] = [
            ("create", Verb::Create),
            ("add", Verb::Create),
            ("update", Verb::Update),
            ("modify", Verb::Update),
            ("delete", Verb::Delete),
            ("remove", Verb::Delete),
            ("get", Verb::Read),
            ("list", Verb::Read),
            ("query", Verb::Read),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| last.starts_with(prefix))
            .map_or(Verb::Update, |(_, verb)| *verb)
    }

    pub fn from_http_method(method: &str) -> Option<Verb> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Some(Verb::Create),
            "GET" | "HEAD" => Some(Verb::Read),
            "PUT" | "PATCH" => Some(Verb::Update),
            "DELETE" => Some(Verb::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ParseEnumError {
                kind: "verb",
                value: other.to_string(),
            }),
        }
    }
}

/// The tenant a decision is made for. `*` (or tenant id 0) is the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Domain {
    Any,
    Tenant(TenantId),
}

impl Domain {
    /// The tenant owning rules of this domain; `None` for the wildcard.
    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Self::Any => None,
            Self::Tenant(id) => Some(*id),
        }
    }

    fn covers(&self, requested: Domain) -> bool {
        *self == Domain::Any || *self == requested
    }
}

impl From<TenantScope> for Domain {
    fn from(scope: TenantScope) -> Self {
        match scope {
            TenantScope::Platform => Self::Any,
            TenantScope::Tenant(id) => Self::Tenant(id),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Tenant(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for Domain {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseEnumError {
            kind: "domain",
            value: s.to_string(),
        };
        if s == "*" {
            return Ok(Self::Any);
        }
        match s.parse::<i64>() {
            Ok(0) => Ok(Self::Any),
            Ok(id) if id > 0 => Ok(Self::Tenant(TenantId::new(id))),
            _ => Err(err()),
        }
    }
}

impl TryFrom<String> for Domain {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

fn operation_matches(pattern: &str, operation: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => operation.starts_with(prefix),
        None => pattern == operation,
    }
}

/// Role/domain/operation/method evaluation. Holds no state: rules are read
/// from the store on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyDecisionPoint;

impl PolicyDecisionPoint {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        rules: &[PolicyRule],
        subject: &Subject,
        domain: Domain,
        operation: &str,
        verb: Verb,
    ) -> Decision {
        if operation.is_empty() {
            return Decision::Deny;
        }
        let eligible = subject.roles_for_domain(domain);
        let allowed = rules.iter().any(|rule| {
            eligible.contains(&rule.role_code.as_str())
                && rule.domain.covers(domain)
                && operation_matches(&rule.operation, operation)
                && rule.method.matches(verb)
        });
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    pub async fn enforce<S: PolicyReader>(
        &self,
        store: &mut S,
        subject: &Subject,
        domain: Domain,
        operation: &str,
        verb: Verb,
    ) -> Result<Decision, EngineError> {
        let eligible: Vec<String> = subject
            .roles_for_domain(domain)
            .into_iter()
            .map(str::to_string)
            .collect();
        if eligible.is_empty() || operation.is_empty() {
            return Ok(Decision::Deny);
        }

        let rules = store.rules_for_roles(&eligible).await?;
        let decision = Self::evaluate(&rules, subject, domain, operation, verb);
        tracing::debug!(
            user_id = %subject.user_id,
            %domain,
            operation,
            verb = %verb,
            rules = rules.len(),
            ?decision,
            "policy evaluated"
        );
        Ok(decision)
    }
}
