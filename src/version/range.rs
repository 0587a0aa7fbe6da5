// src/version/range.rs

//! Version range expressions
//!
//! A range expression is a disjunction of conjunctions:
//! - `||` separates alternatives, any of which may match
//! - whitespace or commas separate clauses that must all hold
//! - clauses use comparison operators (`>=1.0 <2.0`), tilde (`~1.2`),
//!   compatible-release (`~=1.2`) or exact pins (`=1.2.3`, bare `1.2.3`)
//!
//! Pre-release candidates are only eligible when the expression itself
//! names a pre-release, so `>=1.0` never resolves to `2.0.0-rc.1` but
//! `>=2.0.0-rc.0` does.

use crate::error::{Error, Result};
use crate::version::Version;
use tracing::debug;

/// A single comparison clause inside a range
#[derive(Debug, Clone, PartialEq, Eq)]
enum CompareOp {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    /// `~X.Y`: same major and minor, at least the given version
    TildeMinor,
    /// `~=X.Y`: same major, at least the given version
    CompatibleMajor,
}

#[derive(Debug, Clone)]
struct Clause {
    op: CompareOp,
    version: Version,
}

impl Clause {
    fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            CompareOp::Exact => candidate == &self.version,
            CompareOp::Greater => candidate > &self.version,
            CompareOp::GreaterEq => candidate >= &self.version,
            CompareOp::Less => candidate < &self.version,
            CompareOp::LessEq => candidate <= &self.version,
            CompareOp::TildeMinor => {
                candidate.major() == self.version.major()
                    && candidate.minor() == self.version.minor()
                    && candidate >= &self.version
            }
            CompareOp::CompatibleMajor => {
                candidate.major() == self.version.major() && candidate >= &self.version
            }
        }
    }
}

/// All clauses must hold for the conjunction to match
#[derive(Debug, Clone)]
struct Conjunction {
    clauses: Vec<Clause>,
}

impl Conjunction {
    fn admits_prerelease(&self) -> bool {
        self.clauses.iter().any(|c| c.version.is_prerelease())
    }

    fn matches(&self, candidate: &Version) -> bool {
        if candidate.is_prerelease() && !self.admits_prerelease() {
            return false;
        }
        self.clauses.iter().all(|c| c.matches(candidate))
    }
}

/// A parsed range expression
#[derive(Debug, Clone)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<Conjunction>,
}

impl VersionRange {
    /// Parse a range expression
    pub fn parse(expression: &str) -> Result<Self> {
        let raw = expression.trim();
        if raw.is_empty() {
            return Err(Error::InvalidRange(expression.to_string()));
        }

        let mut alternatives = Vec::new();
        for alt in raw.split("||") {
            alternatives.push(parse_conjunction(alt, expression)?);
        }

        Ok(VersionRange {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// The expression text as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the version satisfies any alternative
    pub fn matches(&self, candidate: &Version) -> bool {
        self.alternatives.iter().any(|a| a.matches(candidate))
    }
}

fn parse_conjunction(text: &str, expression: &str) -> Result<Conjunction> {
    // Commas and whitespace both act as AND separators
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Err(Error::InvalidRange(expression.to_string()));
    }

    let mut clauses = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in tokens {
        if let Some(op) = pending_op.take() {
            clauses.push(parse_clause(op, token, expression)?);
            continue;
        }
        // An operator may stand alone with its version in the next token,
        // as in ">= 1.0"
        if is_operator(token) {
            pending_op = Some(token);
            continue;
        }
        let split = token
            .char_indices()
            .find(|(_, c)| !matches!(c, '>' | '<' | '=' | '~'))
            .map(|(i, _)| i)
            .unwrap_or(token.len());
        let (op, rest) = token.split_at(split);
        clauses.push(parse_clause(op, rest, expression)?);
    }

    if pending_op.is_some() || clauses.is_empty() {
        return Err(Error::InvalidRange(expression.to_string()));
    }

    Ok(Conjunction { clauses })
}

fn is_operator(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| matches!(c, '>' | '<' | '=' | '~'))
}

fn parse_clause(op: &str, version: &str, expression: &str) -> Result<Clause> {
    let op = match op {
        "" | "=" | "==" => CompareOp::Exact,
        ">" => CompareOp::Greater,
        ">=" => CompareOp::GreaterEq,
        "<" => CompareOp::Less,
        "<=" => CompareOp::LessEq,
        "~" => CompareOp::TildeMinor,
        "~=" => CompareOp::CompatibleMajor,
        _ => return Err(Error::InvalidRange(expression.to_string())),
    };
    let version =
        Version::parse(version).map_err(|_| Error::InvalidRange(expression.to_string()))?;
    Ok(Clause { op, version })
}

/// Pick the highest candidate satisfying the expression
///
/// Candidates are considered newest-first regardless of input order. The
/// requirer only feeds error reporting.
pub fn resolve(expression: &str, candidates: &[Version], requirer: &str) -> Result<Version> {
    let range = VersionRange::parse(expression).map_err(|_| Error::NotSatisfiableRange {
        expression: expression.to_string(),
        requirer: requirer.to_string(),
    })?;

    let mut ordered: Vec<&Version> = candidates.iter().collect();
    ordered.sort();
    ordered.reverse();

    for candidate in ordered {
        if range.matches(candidate) {
            debug!(
                "Range '{}' for {} resolved to {}",
                expression, requirer, candidate
            );
            return Ok(candidate.clone());
        }
    }

    Err(Error::NotSatisfiableRange {
        expression: expression.to_string(),
        requirer: requirer.to_string(),
    })
}

/// Check a pinned version against an expression
///
/// Returns `Ok(false)` for a well-formed expression the version fails;
/// malformed expressions are errors.
pub fn validate(expression: &str, version: &Version, requirer: &str) -> Result<bool> {
    let range = VersionRange::parse(expression).map_err(|_| Error::NotSatisfiableRange {
        expression: expression.to_string(),
        requirer: requirer.to_string(),
    })?;
    Ok(range.matches(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(specs: &[&str]) -> Vec<Version> {
        specs.iter().map(|s| Version::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_resolve_picks_highest_match() {
        let candidates = versions(&["1.0.0", "1.1.0", "1.2.3", "2.0.0"]);
        let v = resolve(">=1.0 <2.0", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_resolve_comma_acts_as_and() {
        let candidates = versions(&["1.0.0", "1.5.0", "2.1.0"]);
        let v = resolve(">=1.0, <2.0", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.5.0");
    }

    #[test]
    fn test_resolve_alternatives() {
        let candidates = versions(&["0.9.0", "3.0.0"]);
        let v = resolve("<1.0 || >=3.0", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "3.0.0");
    }

    #[test]
    fn test_tilde_pins_minor() {
        let candidates = versions(&["1.2.0", "1.2.9", "1.3.0"]);
        let v = resolve("~1.2", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.2.9");
    }

    #[test]
    fn test_compatible_release_pins_major() {
        let candidates = versions(&["1.2.0", "1.9.0", "2.0.0"]);
        let v = resolve("~=1.2", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.9.0");
    }

    #[test]
    fn test_exact_clause() {
        let candidates = versions(&["1.1.0", "1.2.0"]);
        let v = resolve("=1.1.0", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.1.0");
        let v = resolve("1.2", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.2.0");
    }

    #[test]
    fn test_operator_separated_from_version() {
        let candidates = versions(&["1.0.0", "1.4.0"]);
        let v = resolve(">= 1.0", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.4.0");
    }

    #[test]
    fn test_prerelease_excluded_by_default() {
        let candidates = versions(&["1.0.0", "2.0.0-rc.1"]);
        let v = resolve(">=1.0", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "1.0.0");
    }

    #[test]
    fn test_prerelease_admitted_when_named() {
        let candidates = versions(&["1.0.0", "2.0.0-rc.1"]);
        let v = resolve(">=2.0.0-rc.0", &candidates, "app/1.0").unwrap();
        assert_eq!(v.to_string(), "2.0.0-rc.1");
    }

    #[test]
    fn test_no_match_reports_expression_and_requirer() {
        let candidates = versions(&["1.0.0"]);
        let err = resolve(">=2.0", &candidates, "app/1.0").unwrap_err();
        match err {
            Error::NotSatisfiableRange {
                expression,
                requirer,
            } => {
                assert_eq!(expression, ">=2.0");
                assert_eq!(requirer, "app/1.0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_candidates_not_satisfiable() {
        let err = resolve(">=1.0", &[], "app/1.0").unwrap_err();
        assert!(matches!(err, Error::NotSatisfiableRange { .. }));
    }

    #[test]
    fn test_malformed_expression() {
        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse(">=").is_err());
        assert!(VersionRange::parse(">>1.0").is_err());
        assert!(VersionRange::parse(">=abc").is_err());
    }

    #[test]
    fn test_validate() {
        let v = Version::parse("1.5.0").unwrap();
        assert!(validate(">=1.0 <2.0", &v, "app/1.0").unwrap());
        assert!(!validate(">=2.0", &v, "app/1.0").unwrap());
        assert!(validate("bad range", &v, "app/1.0").is_err());
    }

    #[test]
    fn test_resolved_version_always_validates() {
        let candidates = versions(&["1.0.0", "1.2.3", "1.5.0", "2.0.0-rc.1", "2.1.0"]);
        for expression in [">=1.0", ">=1.0 <2.0", "~1.2", "1.5.0", "<1.3 || >=2.1"] {
            let chosen = resolve(expression, &candidates, "app/1.0").unwrap();
            assert!(
                validate(expression, &chosen, "app/1.0").unwrap(),
                "resolution of [{expression}] chose {chosen} which fails its own range"
            );
        }
    }
}
