use std::collections::{HashMap, HashSet};

use abi::{API_KEY_HEADER, Permission};
use axum::http::{HeaderMap, StatusCode};

/// Decides whether a request may run an operation that needs `required`.
///
/// Implementations must not have side effects on the option or task stores; the
/// gate runs before any service call.
pub trait PermissionGate: Send + Sync {
    fn authorize(&self, headers: &HeaderMap, required: Permission) -> Result<(), AccessDenied>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDenied {
    MissingKey,
    UnknownKey,
    MissingPermission(Permission),
}

impl AccessDenied {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AccessDenied::MissingKey | AccessDenied::UnknownKey => StatusCode::UNAUTHORIZED,
            AccessDenied::MissingPermission(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessDenied::MissingKey => write!(f, "missing {API_KEY_HEADER} header"),
            AccessDenied::UnknownKey => write!(f, "unknown api key"),
            AccessDenied::MissingPermission(permission) => {
                write!(f, "permission {permission} is required")
            }
        }
    }
}

impl std::error::Error for AccessDenied {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionSet {
    all: bool,
    granted: HashSet<Permission>,
}

impl PermissionSet {
    pub fn all() -> Self {
        Self {
            all: true,
            granted: HashSet::new(),
        }
    }

    pub fn of(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            all: false,
            granted: permissions.into_iter().collect(),
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.all || self.granted.contains(&permission)
    }
}

#[derive(Debug)]
pub struct ApiKeyParseError(String);

impl std::fmt::Display for ApiKeyParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid api key list: {}", self.0)
    }
}

impl std::error::Error for ApiKeyParseError {}

/// Static api-key table, the default gate used when no external permission
/// engine is wired in.
#[derive(Clone, Debug, Default)]
pub struct ApiKeyRegistry {
    keys: HashMap<String, PermissionSet>,
}

impl ApiKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>, permissions: PermissionSet) -> Self {
        self.insert(key, permissions);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, permissions: PermissionSet) {
        self.keys.insert(key.into(), permissions);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Parses `key=perm,perm;key2=*`. Permission names are the wire names such as
    /// `thumbnail:read`.
    pub fn parse(raw: &str) -> Result<Self, ApiKeyParseError> {
        let mut registry = Self::new();
        for entry in raw.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((key, permissions)) = entry.split_once('=') else {
                return Err(ApiKeyParseError(format!("entry `{entry}` has no `=`")));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ApiKeyParseError(format!("entry `{entry}` has an empty key")));
            }
            let permissions = permissions.trim();
            let set = if permissions == "*" {
                PermissionSet::all()
            } else {
                let mut granted = Vec::new();
                for name in permissions.split(',').filter(|name| !name.trim().is_empty()) {
                    let permission = Permission::from_name(name).ok_or_else(|| {
                        ApiKeyParseError(format!("unknown permission `{}`", name.trim()))
                    })?;
                    granted.push(permission);
                }
                PermissionSet::of(granted)
            };
            registry.insert(key, set);
        }
        Ok(registry)
    }

    pub fn check(&self, api_key: Option<&str>, required: Permission) -> Result<(), AccessDenied> {
        let key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(AccessDenied::MissingKey)?;
        let permissions = self.keys.get(key).ok_or(AccessDenied::UnknownKey)?;
        if permissions.grants(required) {
            Ok(())
        } else {
            Err(AccessDenied::MissingPermission(required))
        }
    }
}

impl PermissionGate for ApiKeyRegistry {
    fn authorize(&self, headers: &HeaderMap, required: Permission) -> Result<(), AccessDenied> {
        let api_key = headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        self.check(api_key, required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_wildcards_and_named_permissions() {
        let registry = ApiKeyRegistry::parse(
            "admin=*; viewer=thumbnail:read ;editor=thumbnail:read,thumbnail:update",
        )
        .expect("key list should parse");
        assert_eq!(registry.len(), 3);
        assert!(registry.check(Some("admin"), Permission::Delete).is_ok());
        assert!(registry.check(Some("viewer"), Permission::Read).is_ok());
        assert_eq!(
            registry.check(Some("viewer"), Permission::Create),
            Err(AccessDenied::MissingPermission(Permission::Create))
        );
        assert!(registry.check(Some("editor"), Permission::Update).is_ok());
    }

    #[test]
    fn parse_rejects_unknown_permissions() {
        let err = ApiKeyRegistry::parse("k=thumbnail:read,thumbnail:nuke")
            .expect_err("unknown permission should fail");
        assert!(err.to_string().contains("thumbnail:nuke"));
        assert!(ApiKeyRegistry::parse("no-equals").is_err());
        assert!(ApiKeyRegistry::parse("=*").is_err());
    }

    #[test]
    fn missing_and_unknown_keys_are_unauthorized() {
        let registry = ApiKeyRegistry::new().with_key("k", PermissionSet::all());
        let missing = registry.check(None, Permission::Read).unwrap_err();
        assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
        let blank = registry.check(Some("  "), Permission::Read).unwrap_err();
        assert_eq!(blank, AccessDenied::MissingKey);
        let unknown = registry.check(Some("other"), Permission::Read).unwrap_err();
        assert_eq!(unknown.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn gate_reads_the_api_key_header() {
        let registry = ApiKeyRegistry::new()
            .with_key("reader", PermissionSet::of([Permission::Read]));
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "reader".parse().expect("valid header"));
        assert!(registry.authorize(&headers, Permission::Read).is_ok());
        let denied = registry
            .authorize(&headers, Permission::Delete)
            .expect_err("delete is not granted");
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
    }
}
