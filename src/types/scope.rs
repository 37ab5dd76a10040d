//! Composition of dotted scope strings.
//!
//! A scope string is the entity path followed by one leaf token:
//!
//! ```text
//! module-create                 root level
//! mirai-core.branch-create      module level
//! mirai-core.dev.index-next     branch level
//! ```
//!
//! Grants may use `*` for the module or branch segment; requirements never do.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::permission::{CapabilityToken, ScopeLevel};
use crate::error::{Error, Result};
use super::names::{validate_branch_name, validate_module_name};

pub const WILDCARD: &str = "*";
const SEPARATOR: char = '.';

/// The entity path a token is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopePath {
    Root,
    Module(String),
    Branch { module: String, branch: String },
}

impl ScopePath {
    #[must_use]
    pub fn module(name: impl Into<String>) -> Self {
        ScopePath::Module(name.into())
    }

    #[must_use]
    pub fn branch(module: impl Into<String>, branch: impl Into<String>) -> Self {
        ScopePath::Branch {
            module: module.into(),
            branch: branch.into(),
        }
    }

    /// The level of the tokens that may be attached to this path.
    #[must_use]
    pub fn level(&self) -> ScopeLevel {
        match self {
            ScopePath::Root => ScopeLevel::Module,
            ScopePath::Module(_) => ScopeLevel::Branch,
            ScopePath::Branch { .. } => ScopeLevel::Index,
        }
    }

    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        match self {
            ScopePath::Root => Vec::new(),
            ScopePath::Module(module) => vec![module.as_str()],
            ScopePath::Branch { module, branch } => vec![module.as_str(), branch.as_str()],
        }
    }

    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.segments().contains(&WILDCARD)
    }

    /// This path plus every variant with one or more segments replaced by `*`.
    /// The concrete path comes first.
    #[must_use]
    pub fn wildcard_variants(&self) -> Vec<ScopePath> {
        match self {
            ScopePath::Root => vec![ScopePath::Root],
            ScopePath::Module(module) => {
                vec![ScopePath::module(module.as_str()), ScopePath::module(WILDCARD)]
            }
            ScopePath::Branch { module, branch } => vec![
                ScopePath::branch(module.as_str(), branch.as_str()),
                ScopePath::branch(module.as_str(), WILDCARD),
                ScopePath::branch(WILDCARD, branch.as_str()),
                ScopePath::branch(WILDCARD, WILDCARD),
            ],
        }
    }

    fn attach(&self, leaf: &str) -> String {
        match self {
            ScopePath::Root => leaf.to_string(),
            ScopePath::Module(module) => format!("{module}{SEPARATOR}{leaf}"),
            ScopePath::Branch { module, branch } => {
                format!("{module}{SEPARATOR}{branch}{SEPARATOR}{leaf}")
            }
        }
    }

    fn check_level(&self, token: CapabilityToken) -> Result<()> {
        if self.level() != token.level() {
            return Err(Error::validation(format!(
                "'{token}' is a {}-level token and needs {} path segment(s), got {}",
                token.level(),
                token.level().depth(),
                self.segments().len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopePath::Root => f.write_str("<root>"),
            ScopePath::Module(module) => f.write_str(module),
            ScopePath::Branch { module, branch } => write!(f, "{module}{SEPARATOR}{branch}"),
        }
    }
}

/// Composes the single scope string a caller must hold to use `token` at `path`.
///
/// The token must resolve to exactly one leaf and the path must be concrete.
pub fn compose_requirement(path: &ScopePath, token: CapabilityToken) -> Result<String> {
    check_requirement_path(path, token)?;
    Ok(path.attach(single_leaf(token)?))
}

/// The requirement for `token` at `path`, followed by the wildcard forms of
/// the same scope that also satisfy it.
pub fn compose_requirement_candidates(
    path: &ScopePath,
    token: CapabilityToken,
) -> Result<Vec<String>> {
    check_requirement_path(path, token)?;
    let leaf = single_leaf(token)?;

    Ok(path
        .wildcard_variants()
        .iter()
        .map(|variant| variant.attach(leaf))
        .collect())
}

fn check_requirement_path(path: &ScopePath, token: CapabilityToken) -> Result<()> {
    path.check_level(token)?;
    if path.has_wildcard() {
        return Err(Error::validation(format!(
            "requirement path '{path}' must not contain '{WILDCARD}'"
        )));
    }
    Ok(())
}

fn single_leaf(token: CapabilityToken) -> Result<&'static str> {
    let leaves = token.leaves();
    match (leaves.len(), leaves.first().and_then(|leaf| leaf.leaf_name())) {
        (1, Some(name)) => Ok(name),
        _ => Err(Error::InvalidScope(format!(
            "'{token}' expands to {} leaves, a requirement needs exactly one",
            leaves.len()
        ))),
    }
}

/// Expands `token` into its leaf closure and composes one scope string per leaf.
pub fn compose_grant_set(path: &ScopePath, token: CapabilityToken) -> Result<BTreeSet<String>> {
    path.check_level(token)?;

    Ok(token
        .leaves()
        .iter()
        .filter_map(|leaf| leaf.leaf_name())
        .map(|name| path.attach(name))
        .collect())
}

/// A parsed `[module[.branch].]token` expression as accepted by grant administration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantExpression {
    pub path: ScopePath,
    pub token: CapabilityToken,
}

impl GrantExpression {
    /// The leaf scope strings this expression grants.
    pub fn scopes(&self) -> Result<BTreeSet<String>> {
        compose_grant_set(&self.path, self.token)
    }
}

fn validate_segment(
    segment: &str,
    validate: fn(&str) -> std::result::Result<(), String>,
) -> Result<()> {
    if segment == WILDCARD {
        return Ok(());
    }
    validate(segment).map_err(Error::InvalidScope)
}

impl FromStr for GrantExpression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut segments: Vec<&str> = s.split(SEPARATOR).collect();
        let token_name = segments
            .pop()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::InvalidScope(format!("missing token in '{s}'")))?;
        let token: CapabilityToken = token_name.parse()?;

        let path = match segments.as_slice() {
            [] => ScopePath::Root,
            [module] => {
                validate_segment(module, validate_module_name)?;
                ScopePath::module(*module)
            }
            [module, branch] => {
                validate_segment(module, validate_module_name)?;
                validate_segment(branch, validate_branch_name)?;
                ScopePath::branch(*module, *branch)
            }
            _ => {
                return Err(Error::InvalidScope(format!(
                    "'{s}' has too many path segments"
                )));
            }
        };

        path.check_level(token)?;
        Ok(GrantExpression { path, token })
    }
}

impl fmt::Display for GrantExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path {
            ScopePath::Root => write!(f, "{}", self.token),
            _ => write!(f, "{}{SEPARATOR}{}", self.path, self.token),
        }
    }
}
