use std::cmp::Ordering;

use ampm_common::{AmpmError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use semver::Version;

/// One parsed attribute expression. Matchers filter candidates; selectors
/// order the survivors and pick an extreme. `@semver` does both.
#[derive(Debug, Clone)]
pub enum AttrExpr {
    /// Exact string equality.
    Literal(String),
    /// No filtering; the attribute is also dropped from uniqueness checking.
    Ignore,
    /// `@regex:<pattern>`, anchored at the start of the value.
    Regex(regex::Regex),
    /// `@glob:<pattern>` shell-style matching.
    Glob(glob::Pattern),
    /// `@semver:<range-or-order>[,prerelease]`.
    Semver(SemverExpr),
    /// `@date:latest` / `@date:earliest`.
    Date(Direction),
    /// `@num:biggest` / `@num:smallest`.
    Num(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Greatest,
    Least,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemverRange {
    /// `^x.y.z`: compatible within the same major version.
    Caret,
    /// `~x.y.z`: compatible within the same minor version.
    Tilde,
    Greater,
    Less,
}

#[derive(Debug, Clone)]
pub struct SemverExpr {
    range: Option<(SemverRange, Version)>,
    direction: Direction,
    allow_prerelease: bool,
}

fn malformed(expr: &str, reason: impl Into<String>) -> AmpmError {
    AmpmError::MalformedExpression {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

impl AttrExpr {
    /// Parses the right-hand side of `-a key=<expr>`. Anything not starting
    /// with `@` is a literal.
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('@') {
            return Ok(AttrExpr::Literal(raw.to_string()));
        }
        let (tag, body) = match raw.split_once(':') {
            Some((tag, body)) => (tag, Some(body)),
            None => (raw, None),
        };
        match tag {
            "@ignore" => match body {
                None | Some("") => Ok(AttrExpr::Ignore),
                Some(_) => Err(malformed(raw, "@ignore takes no parameter")),
            },
            "@regex" => {
                let pattern = body.ok_or_else(|| malformed(raw, "@regex needs a pattern"))?;
                // Anchored: the pattern matches from the start of the value.
                let compiled = regex::Regex::new(&format!("^(?:{pattern})"))
                    .map_err(|e| malformed(raw, e.to_string()))?;
                Ok(AttrExpr::Regex(compiled))
            }
            "@glob" => {
                let pattern = body.ok_or_else(|| malformed(raw, "@glob needs a pattern"))?;
                let compiled = glob::Pattern::new(pattern)
                    .map_err(|e| malformed(raw, e.to_string()))?;
                Ok(AttrExpr::Glob(compiled))
            }
            "@semver" => {
                let body = body.ok_or_else(|| malformed(raw, "@semver needs a range or order"))?;
                Ok(AttrExpr::Semver(SemverExpr::parse(raw, body)?))
            }
            "@date" => match body {
                Some("latest") => Ok(AttrExpr::Date(Direction::Greatest)),
                Some("earliest") => Ok(AttrExpr::Date(Direction::Least)),
                _ => Err(malformed(raw, "@date accepts `latest` or `earliest`")),
            },
            "@num" => match body {
                Some("biggest") => Ok(AttrExpr::Num(Direction::Greatest)),
                Some("smallest") => Ok(AttrExpr::Num(Direction::Least)),
                _ => Err(malformed(raw, "@num accepts `biggest` or `smallest`")),
            },
            _ => Err(malformed(raw, "unknown expression tag")),
        }
    }

    /// Does this expression filter candidates?
    pub fn is_matcher(&self) -> bool {
        matches!(
            self,
            AttrExpr::Literal(_) | AttrExpr::Regex(_) | AttrExpr::Glob(_) | AttrExpr::Semver(_)
        )
    }

    /// Does this expression pick among multiple matches?
    pub fn is_selector(&self) -> bool {
        matches!(
            self,
            AttrExpr::Semver(_) | AttrExpr::Date(_) | AttrExpr::Num(_)
        )
    }

    /// Matcher semantics. Non-matchers accept everything.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            AttrExpr::Literal(expected) => value == expected,
            AttrExpr::Regex(pattern) => pattern.is_match(value),
            AttrExpr::Glob(pattern) => pattern.matches(value),
            AttrExpr::Semver(expr) => expr.matches(value),
            AttrExpr::Ignore | AttrExpr::Date(_) | AttrExpr::Num(_) => true,
        }
    }

    /// Selector semantics: `Greater` means `a` is preferred over `b`.
    /// Values a selector cannot interpret are a `TypeMismatch`.
    pub fn prefer(&self, attribute: &str, a: &str, b: &str) -> Result<Ordering> {
        match self {
            AttrExpr::Semver(expr) => {
                let va = parse_version(attribute, a)?;
                let vb = parse_version(attribute, b)?;
                Ok(directed(va.cmp(&vb), expr.direction))
            }
            AttrExpr::Date(direction) => {
                let da = parse_instant(attribute, a)?;
                let db = parse_instant(attribute, b)?;
                Ok(directed(da.cmp(&db), *direction))
            }
            AttrExpr::Num(direction) => {
                let na = parse_number(attribute, a)?;
                let nb = parse_number(attribute, b)?;
                Ok(directed(na.total_cmp(&nb), *direction))
            }
            _ => Ok(Ordering::Equal),
        }
    }
}

fn directed(ord: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Greatest => ord,
        Direction::Least => ord.reverse(),
    }
}

impl SemverExpr {
    fn parse(raw: &str, body: &str) -> Result<Self> {
        let (main, flag) = match body.split_once(',') {
            Some((main, flag)) => (main, Some(flag)),
            None => (body, None),
        };
        let allow_prerelease = match flag {
            None => false,
            Some("prerelease") => true,
            Some(_) => return Err(malformed(raw, "only `,prerelease` is understood")),
        };

        let expr = match main {
            "latest" | "newest" => Self {
                range: None,
                direction: Direction::Greatest,
                allow_prerelease,
            },
            "oldest" => Self {
                range: None,
                direction: Direction::Least,
                allow_prerelease,
            },
            _ => {
                let op = match main.chars().next() {
                    Some('^') => SemverRange::Caret,
                    Some('~') => SemverRange::Tilde,
                    Some('>') => SemverRange::Greater,
                    Some('<') => SemverRange::Less,
                    _ => {
                        return Err(malformed(
                            raw,
                            "expected `latest`, `oldest`, or a `^`/`~`/`>`/`<` range",
                        ))
                    }
                };
                let bound = Version::parse(main[1..].trim_start_matches('v'))
                    .map_err(|e| malformed(raw, e.to_string()))?;
                Self {
                    // Ranges always pick the greatest in range.
                    range: Some((op, bound)),
                    direction: Direction::Greatest,
                    allow_prerelease,
                }
            }
        };
        Ok(expr)
    }

    fn matches(&self, value: &str) -> bool {
        let Ok(version) = Version::parse(value.trim_start_matches('v')) else {
            return false;
        };
        if !version.pre.is_empty() && !self.allow_prerelease {
            return false;
        }
        match &self.range {
            None => true,
            Some((SemverRange::Caret, low)) => {
                let high = Version::new(low.major + 1, 0, 0);
                *low <= version && version < high
            }
            Some((SemverRange::Tilde, low)) => {
                let high = Version::new(low.major, low.minor + 1, 0);
                *low <= version && version < high
            }
            Some((SemverRange::Greater, bound)) => version > *bound,
            Some((SemverRange::Less, bound)) => version < *bound,
        }
    }
}

fn parse_version(attribute: &str, value: &str) -> Result<Version> {
    Version::parse(value.trim_start_matches('v')).map_err(|_| AmpmError::TypeMismatch {
        attribute: attribute.to_string(),
        value: value.to_string(),
        expected: "semantic version",
    })
}

/// ISO-8601 instants: RFC 3339, or a naive date/datetime taken as UTC.
fn parse_instant(attribute: &str, value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(AmpmError::TypeMismatch {
        attribute: attribute.to_string(),
        value: value.to_string(),
        expected: "ISO-8601 instant",
    })
}

fn parse_number(attribute: &str, value: &str) -> Result<f64> {
    value.parse().map_err(|_| AmpmError::TypeMismatch {
        attribute: attribute.to_string(),
        value: value.to_string(),
        expected: "number",
    })
}
