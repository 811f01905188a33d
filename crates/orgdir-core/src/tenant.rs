use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TenantType {
    Root,
    Group,
    Normal,
    Sub,
}

impl TenantType {
    pub const ALL: [TenantType; 4] = [Self::Root, Self::Group, Self::Normal, Self::Sub];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "ROOT",
            Self::Group => "GROUP",
            Self::Normal => "NORMAL",
            Self::Sub => "SUB",
        }
    }

    /// The parent type a tenant of this type must hang under. `None` for ROOT.
    pub fn required_parent(&self) -> Option<TenantType> {
        match self {
            Self::Root => None,
            Self::Group | Self::Normal => Some(Self::Root),
            Self::Sub => Some(Self::Group),
        }
    }
}

impl fmt::Display for TenantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROOT" => Ok(Self::Root),
            "GROUP" => Ok(Self::Group),
            "NORMAL" => Ok(Self::Normal),
            "SUB" => Ok(Self::Sub),
            other => Err(ParseEnumError {
                kind: "tenant type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TenantStatus {
    Active,
    Disabled,
    Expired,
    #[default]
    Pending,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Disabled => "DISABLED",
            Self::Expired => "EXPIRED",
            Self::Pending => "PENDING",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "DISABLED" => Ok(Self::Disabled),
            "EXPIRED" => Ok(Self::Expired),
            "PENDING" => Ok(Self::Pending),
            other => Err(ParseEnumError {
                kind: "tenant status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(rename = "type")]
    pub tenant_type: TenantType,
    pub parent_id: Option<TenantId>,
    pub path: String,
    pub level: i32,
    pub status: TenantStatus,
    pub expired_at: Option<DateTime<Utc>>,
    pub attributes: Map<String, Value>,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_root(&self) -> bool {
        self.tenant_type == TenantType::Root
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Ids on the materialized path, ROOT first and this tenant last.
    pub fn path_ids(&self) -> Vec<TenantId> {
        parse_path(&self.path)
    }

    /// True when `ancestor` appears on this tenant's path, including itself.
    pub fn is_within(&self, ancestor: TenantId) -> bool {
        self.path_ids().contains(&ancestor)
    }
}

/// Splits a dot separated id chain. Segments that are not integers are skipped.
pub fn parse_path(path: &str) -> Vec<TenantId> {
    path.split('.')
        .filter_map(|segment| segment.parse::<i64>().ok())
        .map(TenantId::new)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTenant {
    pub name: String,
    pub owner_id: UserId,
    pub tenant_type: TenantType,
    pub parent_id: Option<TenantId>,
    pub status: Option<TenantStatus>,
    pub expired_at: Option<DateTime<Utc>>,
    pub attributes: Map<String, Value>,
}

impl NewTenant {
    pub fn new(tenant_type: TenantType, name: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            name: name.into(),
            owner_id,
            tenant_type,
            parent_id: None,
            status: None,
            expired_at: None,
            attributes: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: TenantId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A single requested change to a tenant. The last four variants name the
/// structural columns and carry no value: asking for them is always refused.
#[derive(Debug, Clone, PartialEq)]
pub enum TenantField {
    Name(String),
    OwnerId(UserId),
    Status(TenantStatus),
    ExpiredAt(Option<DateTime<Utc>>),
    Attributes(Map<String, Value>),
    Level,
    Path,
    ParentId,
    Type,
}

impl TenantField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::OwnerId(_) => "owner_id",
            Self::Status(_) => "status",
            Self::ExpiredAt(_) => "expired_at",
            Self::Attributes(_) => "attributes",
            Self::Level => "level",
            Self::Path => "path",
            Self::ParentId => "parent_id",
            Self::Type => "type",
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Level | Self::Path | Self::ParentId | Self::Type)
    }

    /// Maps a structural column name to its field, if it is one.
    pub fn protected(name: &str) -> Option<TenantField> {
        match name {
            "level" => Some(Self::Level),
            "path" => Some(Self::Path),
            "parent_id" => Some(Self::ParentId),
            "type" => Some(Self::Type),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantUpdate {
    pub fields: Vec<TenantField>,
}

impl TenantUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: TenantField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn protected_field(&self) -> Option<&TenantField> {
        self.fields.iter().find(|f| f.is_protected())
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(TenantField::name).collect()
    }
}
