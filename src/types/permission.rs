use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The entity path a capability token attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    /// Attaches to the root: `module-create`.
    Module,
    /// Attaches to one module: `core.branch-create`.
    Branch,
    /// Attaches to one module branch: `core.main.index-next`.
    Index,
}

impl ScopeLevel {
    /// Number of entity path segments preceding the token.
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            ScopeLevel::Module => 0,
            ScopeLevel::Branch => 1,
            ScopeLevel::Index => 2,
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScopeLevel::Module => "module",
            ScopeLevel::Branch => "branch",
            ScopeLevel::Index => "index",
        })
    }
}

/// A named permission unit. Leaf tokens become the suffix of a scope string,
/// composite tokens stand for the union of the tokens they include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityToken {
    ModuleList,
    ModuleCreate,
    ModuleDelete,
    Module,

    BranchList,
    BranchCreate,
    BranchDelete,
    Branch,

    IndexList,
    IndexLatest,
    IndexRead,
    IndexNext,
    IndexDelete,
    IndexWrite,
    Index,
}

enum Implication {
    Leaf(&'static str),
    Includes(&'static [CapabilityToken]),
}

struct TokenDef {
    token: CapabilityToken,
    name: &'static str,
    level: ScopeLevel,
    implication: Implication,
}

use CapabilityToken as T;

const TOKENS: &[TokenDef] = &[
    TokenDef {
        token: T::ModuleList,
        name: "module-list",
        level: ScopeLevel::Module,
        implication: Implication::Leaf("module-list"),
    },
    TokenDef {
        token: T::ModuleCreate,
        name: "module-create",
        level: ScopeLevel::Module,
        implication: Implication::Leaf("module-create"),
    },
    TokenDef {
        token: T::ModuleDelete,
        name: "module-delete",
        level: ScopeLevel::Module,
        implication: Implication::Leaf("module-delete"),
    },
    TokenDef {
        token: T::Module,
        name: "module",
        level: ScopeLevel::Module,
        implication: Implication::Includes(&[T::ModuleList, T::ModuleCreate, T::ModuleDelete]),
    },
    TokenDef {
        token: T::BranchList,
        name: "branch-list",
        level: ScopeLevel::Branch,
        implication: Implication::Leaf("branch-list"),
    },
    TokenDef {
        token: T::BranchCreate,
        name: "branch-create",
        level: ScopeLevel::Branch,
        implication: Implication::Leaf("branch-create"),
    },
    TokenDef {
        token: T::BranchDelete,
        name: "branch-delete",
        level: ScopeLevel::Branch,
        implication: Implication::Leaf("branch-delete"),
    },
    TokenDef {
        token: T::Branch,
        name: "branch",
        level: ScopeLevel::Branch,
        implication: Implication::Includes(&[T::BranchList, T::BranchCreate, T::BranchDelete]),
    },
    TokenDef {
        token: T::IndexList,
        name: "index-list",
        level: ScopeLevel::Index,
        implication: Implication::Leaf("index-list"),
    },
    TokenDef {
        token: T::IndexLatest,
        name: "index-latest",
        level: ScopeLevel::Index,
        implication: Implication::Leaf("index-latest"),
    },
    TokenDef {
        token: T::IndexRead,
        name: "index-read",
        level: ScopeLevel::Index,
        implication: Implication::Includes(&[T::IndexList, T::IndexLatest]),
    },
    TokenDef {
        token: T::IndexNext,
        name: "index-next",
        level: ScopeLevel::Index,
        implication: Implication::Leaf("index-next"),
    },
    TokenDef {
        token: T::IndexDelete,
        name: "index-delete",
        level: ScopeLevel::Index,
        implication: Implication::Leaf("index-delete"),
    },
    TokenDef {
        token: T::IndexWrite,
        name: "index-write",
        level: ScopeLevel::Index,
        implication: Implication::Includes(&[T::IndexNext, T::IndexDelete]),
    },
    TokenDef {
        token: T::Index,
        name: "index",
        level: ScopeLevel::Index,
        implication: Implication::Includes(&[T::IndexRead, T::IndexWrite]),
    },
];

/// Leaf closure of every token, expanded once on first use.
static CLOSURES: LazyLock<HashMap<CapabilityToken, BTreeSet<CapabilityToken>>> =
    LazyLock::new(|| {
        CapabilityToken::ALL
            .iter()
            .map(|&token| {
                let mut leaves = BTreeSet::new();
                collect_leaves(token, &mut leaves);
                (token, leaves)
            })
            .collect()
    });

fn collect_leaves(token: CapabilityToken, leaves: &mut BTreeSet<CapabilityToken>) {
    match token.def().implication {
        Implication::Leaf(_) => {
            leaves.insert(token);
        }
        Implication::Includes(included) => {
            for &child in included {
                collect_leaves(child, leaves);
            }
        }
    }
}

impl CapabilityToken {
    pub const ALL: [CapabilityToken; 15] = [
        T::ModuleList,
        T::ModuleCreate,
        T::ModuleDelete,
        T::Module,
        T::BranchList,
        T::BranchCreate,
        T::BranchDelete,
        T::Branch,
        T::IndexList,
        T::IndexLatest,
        T::IndexRead,
        T::IndexNext,
        T::IndexDelete,
        T::IndexWrite,
        T::Index,
    ];

    fn def(self) -> &'static TokenDef {
        // TOKENS is declared in the same order as the enum variants.
        &TOKENS[self as usize]
    }

    /// The name used in grant expressions and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.def().name
    }

    #[must_use]
    pub fn level(self) -> ScopeLevel {
        self.def().level
    }

    /// The literal scope suffix, absent for composite tokens.
    #[must_use]
    pub fn leaf_name(self) -> Option<&'static str> {
        match self.def().implication {
            Implication::Leaf(name) => Some(name),
            Implication::Includes(_) => None,
        }
    }

    #[must_use]
    pub fn is_leaf(self) -> bool {
        self.leaf_name().is_some()
    }

    /// The deduplicated set of leaf tokens this token stands for.
    /// A leaf token resolves to itself.
    #[must_use]
    pub fn leaves(self) -> &'static BTreeSet<CapabilityToken> {
        &CLOSURES[&self]
    }

    /// Returns true if holding `self` grants everything `other` grants.
    #[must_use]
    pub fn implies(self, other: CapabilityToken) -> bool {
        self.level() == other.level() && other.leaves().is_subset(self.leaves())
    }

    pub fn parse(s: &str) -> Option<CapabilityToken> {
        TOKENS.iter().find(|def| def.name == s).map(|def| def.token)
    }
}

impl fmt::Display for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CapabilityToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityToken::parse(s).ok_or_else(|| Error::InvalidScope(format!("unknown token '{s}'")))
    }
}

impl Serialize for CapabilityToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CapabilityToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CapabilityToken::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown capability token '{s}'")))
    }
}
