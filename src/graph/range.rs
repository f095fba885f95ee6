//! Version ranges for `skipRange`.
//!
//! ```text
//! >=1.0.0 <1.2.0          AND: every comparator must hold
//! <1.0.0 || >=2.0.0       OR: any alternative may hold
//! 1.2.3                   bare version means =1.2.3
//! !=1.1.0                 anything but 1.1.0
//! ```
//!
//! Missing minor/patch components default to zero (`<1.1` is `<1.1.0`).
//! Build metadata never affects a comparison.

use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Error parsing a version range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// Nothing to parse, or an empty `||` alternative.
    #[error("empty version range")]
    Empty,
    /// An operator with no version after it.
    #[error("operator {0:?} has no version")]
    DanglingOperator(String),
    /// A version that does not parse.
    #[error("invalid version {token:?}: {reason}")]
    Version {
        /// The offending token.
        token: String,
        /// Parser message.
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Le => "<=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
        }
    }
}

// Longest symbols first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 7] = [
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("!=", Op::Ne),
    ("==", Op::Eq),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("=", Op::Eq),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn matches(&self, version: &Version) -> bool {
        self.op.holds(cmp_precedence(version, &self.version))
    }
}

/// Compare two versions ignoring build metadata.
pub fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

fn split_operator(token: &str) -> (Op, &str) {
    for (symbol, op) in OPERATORS {
        if let Some(rest) = token.strip_prefix(symbol) {
            return (op, rest);
        }
    }
    (Op::Eq, token)
}

fn parse_version(token: &str) -> Result<Version, RangeError> {
    let err = |reason: String| RangeError::Version {
        token: token.to_string(),
        reason,
    };

    // Pad `1` and `1.2` before any pre-release or build suffix.
    let split_at = token.find(['-', '+']).unwrap_or(token.len());
    let (core, suffix) = token.split_at(split_at);
    let padded = match core.matches('.').count() {
        0 => format!("{core}.0.0{suffix}"),
        1 => format!("{core}.0{suffix}"),
        _ => token.to_string(),
    };
    Version::parse(&padded).map_err(|e| err(e.to_string()))
}

fn parse_alternative(text: &str) -> Result<Vec<Comparator>, RangeError> {
    let mut comparators = Vec::new();
    let mut pending: Option<(Op, &str)> = None;

    for token in text.split_whitespace() {
        let (op, rest) = match pending.take() {
            // `>= 1.0.0` with a space after the operator.
            Some((op, _)) => (op, token),
            None => split_operator(token),
        };
        if rest.is_empty() {
            pending = Some((op, token));
            continue;
        }
        comparators.push(Comparator {
            op,
            version: parse_version(rest)?,
        });
    }

    if let Some((_, symbol)) = pending {
        return Err(RangeError::DanglingOperator(symbol.to_string()));
    }
    if comparators.is_empty() {
        return Err(RangeError::Empty);
    }
    Ok(comparators)
}

/// A parsed version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    alternatives: Vec<Vec<Comparator>>,
}

impl VersionRange {
    /// Parse a range expression.
    pub fn parse(text: &str) -> Result<Self, RangeError> {
        let alternatives = text
            .split("||")
            .map(parse_alternative)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { alternatives })
    }

    /// Whether `version` satisfies the range.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|all| all.iter().all(|c| c.matches(version)))
    }
}

impl FromStr for VersionRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, alternative) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str(" || ")?;
            }
            for (j, c) in alternative.iter().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}{}", c.op.symbol(), c.version)?;
            }
        }
        Ok(())
    }
}
