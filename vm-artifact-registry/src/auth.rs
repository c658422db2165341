//! Identities and the authorization gate consulted before every repository operation.
//!
//! The core never authenticates anyone itself. The HTTP adapter derives an
//! [`Identity`] from the `Authorization` header and the [`AuthorizationGate`] decides
//! whether that identity may perform an [`AccessMethod`] on a repository path.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashSet;
use std::fmt;

use crate::config::SecurityConfig;
use crate::error::{AppError, AppResult};
use crate::location::Location;
use crate::repository::{Repository, Visibility};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of access requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMethod {
    Read,
    List,
    Write,
    Delete,
}

impl AccessMethod {
    pub fn is_write(&self) -> bool {
        matches!(self, AccessMethod::Write | AccessMethod::Delete)
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessMethod::Read => "READ",
            AccessMethod::List => "LIST",
            AccessMethod::Write => "WRITE",
            AccessMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Decides whether an identity may access a repository path.
pub trait AuthorizationGate: Send + Sync {
    /// `Ok(())` to allow, `Unauthorized` when an identity is missing, `Forbidden`
    /// when the identity is known but not allowed.
    fn authorize(
        &self,
        repository: &Repository,
        location: &Location,
        method: AccessMethod,
        identity: Option<&Identity>,
    ) -> AppResult<()>;
}

/// Default gate driven by repository visibility.
///
/// Public and hidden repositories are readable by anyone, private ones need an
/// identity. Writes and deletes always need an identity, restricted to the
/// configured deployers when that list is non-empty. Anonymous listing of hidden
/// repositories is refused.
#[derive(Debug, Clone, Default)]
pub struct VisibilityGate {
    deployers: HashSet<String>,
}

impl VisibilityGate {
    pub fn new(security: &SecurityConfig) -> Self {
        Self {
            deployers: security.deployers.iter().cloned().collect(),
        }
    }

    fn require_identity<'a>(
        repository: &Repository,
        method: AccessMethod,
        identity: Option<&'a Identity>,
    ) -> AppResult<&'a Identity> {
        identity.ok_or_else(|| {
            AppError::Unauthorized(format!(
                "{method} on repository '{}' requires authentication",
                repository.name()
            ))
        })
    }
}

impl AuthorizationGate for VisibilityGate {
    fn authorize(
        &self,
        repository: &Repository,
        _location: &Location,
        method: AccessMethod,
        identity: Option<&Identity>,
    ) -> AppResult<()> {
        if method.is_write() {
            let identity = Self::require_identity(repository, method, identity)?;
            if !self.deployers.is_empty() && !self.deployers.contains(identity.name()) {
                return Err(AppError::Forbidden(format!(
                    "'{identity}' may not {method} in repository '{}'",
                    repository.name()
                )));
            }
            return Ok(());
        }

        match (repository.visibility(), method) {
            (Visibility::Public, _) => Ok(()),
            (Visibility::Hidden, AccessMethod::Read) => Ok(()),
            (Visibility::Hidden, _) | (Visibility::Private, _) => {
                Self::require_identity(repository, method, identity).map(|_| ())
            }
        }
    }
}

/// Gate that allows everything, for embedded use and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorizationGate for AllowAll {
    fn authorize(
        &self,
        _repository: &Repository,
        _location: &Location,
        _method: AccessMethod,
        _identity: Option<&Identity>,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Extract the identity from a `Basic` Authorization header.
///
/// Only the user name is used; credential checks belong to whatever sits in front
/// of the registry.
pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let username = credentials
        .split_once(':')
        .map_or(credentials.as_str(), |(user, _)| user);

    if username.is_empty() {
        None
    } else {
        Some(Identity::new(username))
    }
}
