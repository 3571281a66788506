//! Coverage identifiers and per-class / per-method coverage records.

use super::Fraction;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineId {
    pub file_name: String,
    pub line_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstructionId {
    pub line: LineId,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId {
    pub line: LineId,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId {
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId {
    pub name: String,
}

impl LineId {
    pub fn new(file_name: impl Into<String>, line_number: u32) -> Self {
        Self {
            file_name: file_name.into(),
            line_number,
        }
    }
}

impl MethodId {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl ClassId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Discriminated union over every coverage key kind, used on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Id {
    Line(LineId),
    Instruction(InstructionId),
    Branch(BranchId),
    Method(MethodId),
    Class(ClassId),
}

/// A key that can be stored in an `Extended` coverage map.
pub trait CoverageKey: Ord + Clone + Into<Id> + TryFrom<Id, Error = Id> {}

macro_rules! coverage_key {
    ($ty:ident, $variant:ident) => {
        impl From<$ty> for Id {
            fn from(id: $ty) -> Self {
                Id::$variant(id)
            }
        }

        impl TryFrom<Id> for $ty {
            type Error = Id;

            fn try_from(id: Id) -> Result<Self, Id> {
                match id {
                    Id::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }

        impl CoverageKey for $ty {}
    };
}

coverage_key!(LineId, Line);
coverage_key!(InstructionId, Instruction);
coverage_key!(BranchId, Branch);
coverage_key!(MethodId, Method);
coverage_key!(ClassId, Class);

/// Coverage of one kind of unit (lines, instructions or branches).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageInfo<T: Ord> {
    /// Aggregate counts only.
    Basic { covered: u64, total: u64 },
    /// Per-unit detail; counts are derived from the map.
    Extended { coverage: BTreeMap<T, bool> },
}

impl<T: Ord> CoverageInfo<T> {
    pub fn basic(covered: u64, total: u64) -> Self {
        Self::Basic { covered, total }
    }

    pub fn empty() -> Self {
        Self::Basic {
            covered: 0,
            total: 0,
        }
    }

    pub fn covered(&self) -> u64 {
        match self {
            Self::Basic { covered, .. } => *covered,
            Self::Extended { coverage } => coverage.values().filter(|c| **c).count() as u64,
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            Self::Basic { total, .. } => *total,
            Self::Extended { coverage } => coverage.len() as u64,
        }
    }

    pub fn fraction(&self) -> Fraction {
        Fraction::new(self.covered(), self.total())
    }

    /// `covered / total`, `0.0` when there is nothing to cover.
    pub fn ratio(&self) -> f64 {
        self.fraction().ratio()
    }
}

impl<T: Ord> Default for CoverageInfo<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Serialize, Deserialize)]
struct CoverageEntry {
    id: Id,
    covered: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum CoverageRepr {
    Basic { covered: u64, total: u64 },
    Extended { coverage: Vec<CoverageEntry> },
}

impl<T: CoverageKey> Serialize for CoverageInfo<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self {
            Self::Basic { covered, total } => CoverageRepr::Basic {
                covered: *covered,
                total: *total,
            },
            Self::Extended { coverage } => CoverageRepr::Extended {
                coverage: coverage
                    .iter()
                    .map(|(id, covered)| CoverageEntry {
                        id: id.clone().into(),
                        covered: *covered,
                    })
                    .collect(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de, T: CoverageKey> Deserialize<'de> for CoverageInfo<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match CoverageRepr::deserialize(deserializer)? {
            CoverageRepr::Basic { covered, total } => Ok(Self::Basic { covered, total }),
            CoverageRepr::Extended { coverage } => {
                let mut map = BTreeMap::new();
                for entry in coverage {
                    let key = T::try_from(entry.id)
                        .map_err(|id| D::Error::custom(format!("unexpected id kind: {:?}", id)))?;
                    map.insert(key, entry.covered);
                }
                Ok(Self::Extended { coverage: map })
            }
        }
    }
}

/// Coverage of a single measured method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCoverageInfo {
    pub method_id: MethodId,
    pub instructions: CoverageInfo<InstructionId>,
    pub lines: CoverageInfo<LineId>,
    pub branches: CoverageInfo<BranchId>,
}

/// Coverage of one class; aggregates are sums over its methods.
///
/// `methods` holds at most one entry per [`MethodId`] when built through
/// [`ClassCoverageInfo::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCoverageInfo {
    pub class_id: ClassId,
    pub methods: Vec<MethodCoverageInfo>,
}

impl ClassCoverageInfo {
    /// Keeps the first record of each method; later duplicates are dropped.
    pub fn new(class_id: ClassId, methods: impl IntoIterator<Item = MethodCoverageInfo>) -> Self {
        let mut seen = BTreeSet::new();
        let methods = methods
            .into_iter()
            .filter(|method| {
                let fresh = seen.insert(method.method_id.clone());
                if !fresh {
                    tracing::warn!(
                        "Duplicate coverage record for {}{} in {}",
                        method.method_id.name,
                        method.method_id.descriptor,
                        class_id.name
                    );
                }
                fresh
            })
            .collect();
        Self { class_id, methods }
    }

    pub fn empty(class_id: ClassId) -> Self {
        Self {
            class_id,
            methods: Vec::new(),
        }
    }

    pub fn instructions(&self) -> CoverageInfo<InstructionId> {
        sum(self.methods.iter().map(|m| &m.instructions))
    }

    pub fn lines(&self) -> CoverageInfo<LineId> {
        sum(self.methods.iter().map(|m| &m.lines))
    }

    pub fn branches(&self) -> CoverageInfo<BranchId> {
        sum(self.methods.iter().map(|m| &m.branches))
    }
}

fn sum<'a, T: Ord + 'a>(infos: impl Iterator<Item = &'a CoverageInfo<T>>) -> CoverageInfo<T> {
    let (covered, total) = infos.fold((0, 0), |(covered, total), info| {
        (covered + info.covered(), total + info.total())
    });
    CoverageInfo::basic(covered, total)
}

/// Top-level result unit for one benchmark evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteCoverage {
    pub compilation_rate: Fraction,
    pub coverage: Vec<ClassCoverageInfo>,
}

impl TestSuiteCoverage {
    /// Coverage record for a class by internal or qualified name.
    pub fn class(&self, name: &str) -> Option<&ClassCoverageInfo> {
        let internal = name.replace('.', "/");
        self.coverage
            .iter()
            .find(|c| c.class_id.name == name || c.class_id.name == internal)
    }
}
