//! Date clause consolidation.
//!
//! `date=ge2020&date=lt2021` is two clauses, and compiled separately each
//! could be satisfied by a different indexed period. Merging them into one
//! clause with a range value makes both bounds apply to the same row and
//! saves a join.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::types::{DateBound, ParameterClause, ParameterValue, SearchParamType, SearchPrefix};

/// Which stored column a bound constrains, and from which side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundSlot {
    /// `gt`, `ge`: the period ends after a point.
    EndAfter,
    /// `sa`: the period starts after a point.
    StartAfter,
    /// `lt`, `le`: the period starts before a point.
    StartBefore,
    /// `eb`: the period ends before a point.
    EndBefore,
}

fn slot(prefix: SearchPrefix) -> Option<BoundSlot> {
    match prefix {
        SearchPrefix::Gt | SearchPrefix::Ge => Some(BoundSlot::EndAfter),
        SearchPrefix::Sa => Some(BoundSlot::StartAfter),
        SearchPrefix::Lt | SearchPrefix::Le => Some(BoundSlot::StartBefore),
        SearchPrefix::Eb => Some(BoundSlot::EndBefore),
        SearchPrefix::Eq | SearchPrefix::Ne | SearchPrefix::Ap => None,
    }
}

/// The compared instant and whether the comparison is strict.
fn threshold(bound: &DateBound) -> (DateTime<Utc>, bool) {
    match bound.prefix {
        SearchPrefix::Gt | SearchPrefix::Sa => (bound.value.upper, true),
        SearchPrefix::Le => (bound.value.upper, false),
        SearchPrefix::Ge => (bound.value.lower, false),
        _ => (bound.value.lower, true),
    }
}

/// Orders two bounds of the same slot, `Greater` meaning more restrictive.
fn restrictiveness(slot: BoundSlot, a: &DateBound, b: &DateBound) -> Ordering {
    let (at, a_strict) = threshold(a);
    let (bt, b_strict) = threshold(b);
    match slot {
        // lower bounds: a higher threshold is stricter
        BoundSlot::EndAfter | BoundSlot::StartAfter => at.cmp(&bt).then(a_strict.cmp(&b_strict)),
        // upper bounds: a lower threshold is stricter
        BoundSlot::StartBefore | BoundSlot::EndBefore => bt.cmp(&at).then(a_strict.cmp(&b_strict)),
    }
}

fn single_date_bound(clause: &ParameterClause) -> Option<&DateBound> {
    if clause.param_type != SearchParamType::Date
        || clause.modifier.is_some()
        || clause.chain.is_some()
    {
        return None;
    }
    match clause.values.as_slice() {
        [ParameterValue::Date { bound }] => Some(bound),
        _ => None,
    }
}

/// Merges same-code date clauses that have no modifier, no chain and a
/// single value into one clause per code.
///
/// Only the most restrictive bound per stored column and side is kept;
/// `eq`, `ne` and `ap` bounds are kept as given. Every other clause passes
/// through unchanged and in order.
pub fn consolidate_date_clauses(clauses: Vec<ParameterClause>) -> Vec<ParameterClause> {
    let mut output: Vec<ParameterClause> = Vec::with_capacity(clauses.len());
    // (code, index in output, collected bounds)
    let mut groups: Vec<(String, usize, Vec<DateBound>)> = Vec::new();

    for clause in clauses {
        let Some(bound) = single_date_bound(&clause).cloned() else {
            output.push(clause);
            continue;
        };
        match groups.iter_mut().find(|(code, _, _)| *code == clause.code) {
            Some((_, _, bounds)) => bounds.push(bound),
            None => {
                groups.push((clause.code.clone(), output.len(), vec![bound]));
                output.push(clause);
            }
        }
    }

    for (code, index, bounds) in groups {
        if bounds.len() < 2 {
            continue;
        }
        let merged = merge_bounds(bounds);
        tracing::debug!(parameter = %code, bounds = merged.len(), "Consolidated date clauses");
        output[index].values = vec![ParameterValue::DateRange { bounds: merged }];
    }
    output
}

fn merge_bounds(bounds: Vec<DateBound>) -> Vec<DateBound> {
    let mut kept: Vec<DateBound> = Vec::with_capacity(bounds.len());
    let mut slots: Vec<(BoundSlot, usize)> = Vec::new();

    for bound in bounds {
        let Some(slot) = slot(bound.prefix) else {
            kept.push(bound);
            continue;
        };
        match slots.iter().find(|(s, _)| *s == slot) {
            Some(&(_, at)) => {
                if restrictiveness(slot, &bound, &kept[at]) == Ordering::Greater {
                    kept[at] = bound;
                }
            }
            None => {
                slots.push((slot, kept.len()));
                kept.push(bound);
            }
        }
    }
    kept
}
