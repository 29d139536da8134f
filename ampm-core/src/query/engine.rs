use std::collections::{BTreeMap, BTreeSet};
use std::cmp::Ordering;
use std::fmt;

use ampm_common::model::{ArtifactId, ArtifactMetadata};
use ampm_common::{AmpmError, Result};

use crate::query::expr::AttrExpr;

/// Attributes that every record carries implicitly. They never make a query
/// ambiguous unless the query names them.
const IMPLICIT_ATTRS: [&str; 3] = ["name", "description", "pubdate"];

#[derive(Debug, Clone)]
pub struct Constraint {
    pub key: String,
    pub raw: String,
    pub expr: AttrExpr,
}

/// A parsed query: a type prefix plus attribute constraints, in declaration
/// order. `-a @any=@ignore` sets the wildcard: attributes not named in the
/// query stop counting toward uniqueness.
#[derive(Debug, Clone)]
pub struct Query {
    pub type_prefix: String,
    pub constraints: Vec<Constraint>,
    pub wildcard_ignore: bool,
}

impl Query {
    pub fn new(type_prefix: &str, attrs: &[(String, String)]) -> Result<Self> {
        let mut constraints: Vec<Constraint> = Vec::new();
        let mut wildcard_ignore = false;
        for (key, raw) in attrs {
            if key == "@any" {
                if !matches!(AttrExpr::parse(raw)?, AttrExpr::Ignore) {
                    return Err(AmpmError::MalformedExpression {
                        expr: format!("{key}={raw}"),
                        reason: "@any only accepts @ignore".into(),
                    });
                }
                wildcard_ignore = true;
                continue;
            }
            if key.starts_with('@') {
                return Err(AmpmError::MalformedExpression {
                    expr: format!("{key}={raw}"),
                    reason: "invalid attribute name".into(),
                });
            }
            let constraint = Constraint {
                key: key.clone(),
                raw: raw.clone(),
                expr: AttrExpr::parse(raw)?,
            };
            // A repeated key replaces the earlier constraint.
            match constraints.iter_mut().find(|c| &c.key == key) {
                Some(existing) => *existing = constraint,
                None => constraints.push(constraint),
            }
        }
        Ok(Self {
            type_prefix: type_prefix.trim_matches('/').to_lowercase(),
            constraints,
            wildcard_ignore,
        })
    }

    fn named(&self, attribute: &str) -> bool {
        self.constraints.iter().any(|c| c.key == attribute)
    }

    fn is_ignored(&self, attribute: &str) -> bool {
        self.constraints
            .iter()
            .any(|c| c.key == attribute && matches!(c.expr, AttrExpr::Ignore))
    }

    fn is_selector(&self, attribute: &str) -> bool {
        self.constraints
            .iter()
            .any(|c| c.key == attribute && c.expr.is_selector())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attrs = self
            .constraints
            .iter()
            .map(|c| format!("{}={}", c.key, c.raw))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({attrs})", self.type_prefix)
    }
}

/// `type:fingerprint` followed by the record's attributes, one line.
pub fn format_short(id: &ArtifactId, meta: &ArtifactMetadata) -> String {
    let attrs = meta
        .combined_attrs()
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{id}\t{attrs}")
}

fn matches_record(query: &Query, combined: &BTreeMap<String, String>) -> bool {
    for constraint in &query.constraints {
        if matches!(constraint.expr, AttrExpr::Ignore) {
            continue;
        }
        // Matchers and selectors alike need the attribute present.
        let Some(value) = combined.get(&constraint.key) else {
            return false;
        };
        if constraint.expr.is_matcher() && !constraint.expr.matches(value) {
            return false;
        }
    }
    true
}

/// The filter step alone: every candidate that satisfies the matcher
/// constraints, in scan order. `list` stops here; `get` continues through
/// uniqueness and selection.
pub fn filter(
    query: &Query,
    candidates: Vec<(ArtifactId, ArtifactMetadata)>,
) -> Vec<(ArtifactId, ArtifactMetadata)> {
    candidates
        .into_iter()
        .filter(|(_, meta)| matches_record(query, &meta.combined_attrs()))
        .collect()
}

/// Full resolution: filter, enforce uniqueness over the relevant attributes,
/// then reduce through the selectors. Exactly one record survives or the
/// query fails.
pub fn select_single(
    query: &Query,
    candidates: Vec<(ArtifactId, ArtifactMetadata)>,
) -> Result<(ArtifactId, ArtifactMetadata)> {
    let mut survivors: Vec<(ArtifactId, ArtifactMetadata, BTreeMap<String, String>)> = candidates
        .into_iter()
        .filter_map(|(id, meta)| {
            let combined = meta.combined_attrs();
            matches_record(query, &combined).then_some((id, meta, combined))
        })
        .collect();
    if survivors.is_empty() {
        return Err(AmpmError::NotFound(query.to_string()));
    }

    // An attribute is relevant to uniqueness unless the query ignores it,
    // the wildcard drops it, a selector consumes it, or it is implicit.
    let mut relevant: BTreeSet<String> = survivors
        .iter()
        .flat_map(|(_, _, combined)| combined.keys().cloned())
        .collect();
    relevant.retain(|attr| {
        !query.is_ignored(attr)
            && !query.is_selector(attr)
            && !(query.wildcard_ignore && !query.named(attr))
            && !(IMPLICIT_ATTRS.contains(&attr.as_str()) && !query.named(attr))
    });

    let mut partitions: BTreeMap<Vec<Option<&str>>, Vec<usize>> = BTreeMap::new();
    for (index, (_, _, combined)) in survivors.iter().enumerate() {
        let key: Vec<Option<&str>> = relevant
            .iter()
            .map(|attr| combined.get(attr).map(String::as_str))
            .collect();
        partitions.entry(key).or_default().push(index);
    }
    if partitions.len() > 1 {
        let distinguishing: Vec<String> = relevant
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                partitions
                    .keys()
                    .map(|key| &key[*i])
                    .collect::<BTreeSet<_>>()
                    .len()
                    > 1
            })
            .map(|(_, attr)| attr.clone())
            .collect();
        return Err(ambiguous(query, &survivors, distinguishing));
    }

    let mut pool: Vec<usize> = partitions.into_values().next().unwrap_or_default();
    for constraint in query.constraints.iter().filter(|c| c.expr.is_selector()) {
        let mut best: Vec<usize> = Vec::new();
        for index in pool {
            let value = survivors[index].2.get(&constraint.key).map(String::as_str);
            // Presence was enforced by the filter step.
            let Some(value) = value else { continue };
            match best.first() {
                None => best.push(index),
                Some(&leader) => {
                    let leader_value = survivors[leader]
                        .2
                        .get(&constraint.key)
                        .map(String::as_str)
                        .unwrap_or_default();
                    match constraint.expr.prefer(&constraint.key, value, leader_value)? {
                        Ordering::Greater => best = vec![index],
                        Ordering::Equal => best.push(index),
                        Ordering::Less => {}
                    }
                }
            }
        }
        pool = best;
    }

    match pool.len() {
        0 => Err(AmpmError::NotFound(query.to_string())),
        1 => {
            let (id, meta, _) = survivors.swap_remove(pool[0]);
            Ok((id, meta))
        }
        // Indistinguishable under every selector: never silently pick one.
        _ => Err(ambiguous(query, &survivors, Vec::new())),
    }
}

fn ambiguous(
    query: &Query,
    survivors: &[(ArtifactId, ArtifactMetadata, BTreeMap<String, String>)],
    attributes: Vec<String>,
) -> AmpmError {
    AmpmError::AmbiguousQuery {
        query: query.to_string(),
        attributes,
        options: survivors
            .iter()
            .map(|(id, meta, _)| format_short(id, meta))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use ampm_common::model::{Compression, PathType};
    use chrono::{TimeZone, Utc};

    fn record(attrs: &[(&str, &str)]) -> (ArtifactId, ArtifactMetadata) {
        let meta = ArtifactMetadata {
            artifact_type: "foobar".into(),
            name: "payload.bin".into(),
            description: String::new(),
            path_type: PathType::File,
            remote_path: None,
            compression: Compression::None,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            env: BTreeMap::new(),
            pubdate: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        (meta.id().unwrap(), meta)
    }

    fn query(attrs: &[(&str, &str)]) -> Query {
        let attrs: Vec<(String, String)> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Query::new("foobar", &attrs).unwrap()
    }

    #[test]
    fn literal_filter_and_selection() {
        // Same arch, different pubdate attribute: @date:latest picks June.
        let candidates = vec![
            record(&[("arch", "x86_64"), ("built", "2024-01-01T00:00:00Z")]),
            record(&[("arch", "x86_64"), ("built", "2024-06-01T00:00:00Z")]),
        ];
        let expected = candidates[1].0.clone();
        let q = query(&[("arch", "x86_64"), ("built", "@date:latest")]);
        let (id, _) = select_single(&q, candidates).unwrap();
        assert_eq!(id, expected);
    }

    #[test]
    fn unconstrained_attribute_makes_query_ambiguous() {
        let candidates = vec![
            record(&[("arch", "x86_64"), ("built", "2024-01-01T00:00:00Z")]),
            record(&[("arch", "i386"), ("built", "2024-06-01T00:00:00Z")]),
        ];
        let q = query(&[("built", "@date:latest")]);
        match select_single(&q, candidates).unwrap_err() {
            AmpmError::AmbiguousQuery {
                attributes, options, ..
            } => {
                assert_eq!(attributes, vec!["arch".to_string()]);
                assert_eq!(options.len(), 2);
            }
            other => panic!("expected AmbiguousQuery, got {other:?}"),
        }
    }

    #[test]
    fn wildcard_ignore_collapses_uniqueness() {
        let candidates = vec![
            record(&[("arch", "x86_64"), ("built", "2024-01-01T00:00:00Z")]),
            record(&[("arch", "i386"), ("built", "2024-06-01T00:00:00Z")]),
        ];
        let expected = candidates[1].0.clone();
        let q = query(&[("built", "@date:latest"), ("@any", "@ignore")]);
        let (id, _) = select_single(&q, candidates).unwrap();
        assert_eq!(id, expected);
    }

    #[test]
    fn explicit_ignore_drops_one_attribute() {
        let candidates = vec![
            record(&[("arch", "x86_64"), ("built", "2024-01-01T00:00:00Z")]),
            record(&[("arch", "i386"), ("built", "2024-06-01T00:00:00Z")]),
        ];
        let expected = candidates[1].0.clone();
        let q = query(&[("built", "@date:latest"), ("arch", "@ignore")]);
        let (id, _) = select_single(&q, candidates).unwrap();
        assert_eq!(id, expected);
    }

    #[test]
    fn semver_range_selects_greatest_in_range() {
        let candidates = vec![
            record(&[("version", "0.9.0")]),
            record(&[("version", "1.2.3")]),
            record(&[("version", "2.0.0")]),
        ];
        let expected = candidates[1].0.clone();
        let q = query(&[("version", "@semver:^1.0.0")]);
        let (id, meta) = select_single(&q, candidates).unwrap();
        assert_eq!(id, expected);
        assert_eq!(meta.attributes["version"], "1.2.3");
    }

    #[test]
    fn selectors_compose() {
        let candidates = vec![
            record(&[("version", "1.2.3"), ("rev", "1")]),
            record(&[("version", "1.2.3"), ("rev", "2")]),
            record(&[("version", "1.0.0"), ("rev", "9")]),
        ];
        let expected = candidates[1].0.clone();
        let q = query(&[("version", "@semver:latest"), ("rev", "@num:biggest")]);
        let (id, _) = select_single(&q, candidates).unwrap();
        assert_eq!(id, expected);
    }

    #[test]
    fn exact_duplicates_stay_ambiguous() {
        // Records distinguished only by name; with the name ignored they are
        // indistinguishable and must not be silently picked from.
        let a = record(&[("arch", "x86_64")]);
        let mut b_meta = a.1.clone();
        b_meta.name = "other.bin".into();
        let b = (b_meta.id().unwrap(), b_meta);
        let q = query(&[("arch", "x86_64")]);
        assert!(matches!(
            select_single(&q, vec![a, b]),
            Err(AmpmError::AmbiguousQuery { .. })
        ));
    }

    #[test]
    fn missing_attribute_fails_the_constraint() {
        let candidates = vec![
            record(&[("arch", "x86_64")]),
            record(&[("flavor", "debug")]),
        ];
        let q = query(&[("arch", "x86_64")]);
        let survivors = filter(&q, candidates);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].1.attributes["arch"], "x86_64");
    }

    #[test]
    fn not_found_and_type_mismatch() {
        let q = query(&[("arch", "riscv")]);
        assert!(matches!(
            select_single(&q, vec![record(&[("arch", "x86_64")])]),
            Err(AmpmError::NotFound(_))
        ));

        let q = query(&[("built", "@date:latest")]);
        let candidates = vec![
            record(&[("built", "not-a-date")]),
            record(&[("built", "2024-01-01T00:00:00Z")]),
        ];
        assert!(matches!(
            select_single(&q, candidates),
            Err(AmpmError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn filter_agrees_with_selection() {
        // When the filter step leaves exactly one candidate, get and list
        // agree on it.
        let candidates = vec![
            record(&[("arch", "x86_64")]),
            record(&[("arch", "i386")]),
        ];
        let q = query(&[("arch", "i386")]);
        let filtered = filter(&q, candidates.clone());
        assert_eq!(filtered.len(), 1);
        let (id, _) = select_single(&q, candidates).unwrap();
        assert_eq!(filtered[0].0, id);
    }

    #[test]
    fn rejects_bad_query_keys() {
        assert!(Query::new("foobar", &[("@any".into(), "x".into())]).is_err());
        assert!(Query::new("foobar", &[("@weird".into(), "@ignore".into())]).is_err());
        let q = Query::new("foobar", &[("@any".into(), "@ignore".into())]).unwrap();
        assert!(q.wildcard_ignore);
    }
}
