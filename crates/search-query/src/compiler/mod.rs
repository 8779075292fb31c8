//! Parameter compilation.
//!
//! [`compile_parameter`] compiles one top-level clause into its own scope and
//! hands the result back to the parent; [`compile_clause`] dispatches a single
//! (unchained, or terminal) clause to the renderer by type and modifier.

mod consolidate;

pub use consolidate::consolidate_date_clauses;

use crate::context::QueryContext;
use crate::error::{ChainError, ParameterError, QueryResult};
use crate::renderer::SearchQueryRenderer;
use crate::types::{
    Chain, ChainDirection, ParameterClause, ParameterValue, SearchModifier, SearchParamType,
    split_escaped,
};

/// `_profile` is the only canonical parameter indexed in its own table.
pub const PROFILE: &str = "_profile";
/// Meta tags.
pub const TAG: &str = "_tag";
/// Security labels.
pub const SECURITY: &str = "_security";

/// Compiles a top-level clause.
///
/// Entity-column clauses (`_id`, `_lastUpdated`) constrain the parent row
/// directly. Everything else is compiled inside a fresh parameter scope,
/// walking the chain first when there is one.
pub fn compile_parameter<R: SearchQueryRenderer>(
    renderer: &R,
    parent: QueryContext<R::Builder>,
    clause: &ParameterClause,
) -> QueryResult<QueryContext<R::Builder>> {
    if clause.is_entity_column() && !clause.is_chained() && clause.modifier.is_none() {
        return compile_clause(renderer, parent, clause);
    }

    let scope = renderer.parameter_base_scope(&parent);
    let scope = match &clause.chain {
        None => compile_clause(renderer, scope, clause)?,
        Some(chain) => compile_chain(renderer, scope, chain, clause)?,
    };
    Ok(renderer.close_parameter_scope(parent, scope))
}

/// Walks the hops of a chain, then compiles the terminal clause against the
/// resource reached by the last hop.
pub fn compile_chain<R: SearchQueryRenderer>(
    renderer: &R,
    mut ctx: QueryContext<R::Builder>,
    chain: &Chain,
    terminal: &ParameterClause,
) -> QueryResult<QueryContext<R::Builder>> {
    let max_depth = renderer.config().max_chain_depth;
    if chain.depth() > max_depth {
        return Err(ChainError::TooDeep {
            depth: chain.depth(),
            max_depth,
        }
        .into());
    }

    for hop in chain.hops() {
        let from = ctx.entity_type().to_string();
        ctx = match hop.direction {
            ChainDirection::Forward => renderer.attach_chain_hop(ctx, hop)?,
            ChainDirection::Reverse => renderer.attach_reverse_chain_hop(ctx, hop)?,
        };
        tracing::debug!(
            direction = ?hop.direction,
            parameter = %hop.reference_param,
            from = %from,
            to = %ctx.entity_type(),
            depth = ctx.chain_depth(),
            "Attached chain hop"
        );
    }

    renderer.attach_terminal_filter(ctx, terminal)
}

/// Compiles one clause in the current scope, ignoring its chain.
pub fn compile_clause<R: SearchQueryRenderer>(
    renderer: &R,
    ctx: QueryContext<R::Builder>,
    clause: &ParameterClause,
) -> QueryResult<QueryContext<R::Builder>> {
    validate_clause(clause)?;

    if let Some(missing) = clause.missing_flag()? {
        return renderer.attach_missing(ctx, clause, missing);
    }

    match clause.param_type {
        SearchParamType::Id => renderer.attach_id(ctx, clause),
        SearchParamType::LastUpdated => renderer.attach_last_updated(ctx, clause),
        SearchParamType::String | SearchParamType::Uri => renderer.attach_string(ctx, clause),
        SearchParamType::Token => match clause.code.as_str() {
            TAG | SECURITY => renderer.attach_tag(ctx, clause),
            _ => renderer.attach_token(ctx, clause),
        },
        SearchParamType::Number => renderer.attach_number(ctx, clause),
        SearchParamType::Quantity => renderer.attach_quantity(ctx, clause),
        SearchParamType::Date => renderer.attach_date(ctx, clause),
        SearchParamType::Reference => renderer.attach_reference(ctx, clause),
        SearchParamType::Canonical if clause.code == PROFILE => {
            renderer.attach_profile(ctx, clause)
        }
        SearchParamType::Canonical => {
            let rewritten = rewrite_canonical(clause)?;
            match rewritten.param_type {
                SearchParamType::Composite => renderer.attach_composite(ctx, &rewritten),
                _ => renderer.attach_string(ctx, &rewritten),
            }
        }
        SearchParamType::Composite => renderer.attach_composite(ctx, clause),
        SearchParamType::Special => renderer.attach_location(ctx, clause),
    }
}

/// Index parameter holding the url part of a canonical parameter.
pub fn canonical_url_parameter(code: &str) -> String {
    format!("{}-url", code)
}

/// Index parameter holding the version part of a canonical parameter.
pub fn canonical_version_parameter(code: &str) -> String {
    format!("{}-version", code)
}

/// Rewrites a canonical clause into the clause that is actually compiled.
///
/// Values with a version become two-component composites (url, version)
/// that must match the same indexed canonical. Without any version the
/// clause is a uri match on the url part. `:above` and `:below` apply to
/// the url and ignore versions.
pub fn rewrite_canonical(clause: &ParameterClause) -> Result<ParameterClause, ParameterError> {
    let url_param = canonical_url_parameter(&clause.code);
    let version_param = canonical_version_parameter(&clause.code);

    let mut pairs = Vec::with_capacity(clause.values.len());
    for value in &clause.values {
        let raw = value.as_text().ok_or_else(|| ParameterError::ValueShapeMismatch {
            parameter: clause.code.clone(),
            param_type: clause.param_type.to_string(),
        })?;
        let mut parts = split_escaped(raw, '|').into_iter();
        let url = parts.next().unwrap_or_default();
        let version = parts.next().filter(|v| !v.is_empty());
        pairs.push((url, version));
    }

    let versioned = pairs.iter().any(|(_, version)| version.is_some());
    let url_modifier = match &clause.modifier {
        Some(m @ (SearchModifier::Above | SearchModifier::Below)) => Some(m.clone()),
        _ => None,
    };

    if !versioned || url_modifier.is_some() {
        let mut rewritten = ParameterClause::new(url_param, SearchParamType::Uri).with_values(
            pairs
                .into_iter()
                .map(|(url, _)| ParameterValue::text(url))
                .collect(),
        );
        rewritten.modifier = url_modifier;
        return Ok(rewritten);
    }

    let values = pairs
        .into_iter()
        .map(|(url, version)| {
            let mut components = vec![
                ParameterClause::new(url_param.clone(), SearchParamType::Uri)
                    .with_value(ParameterValue::text(url)),
            ];
            if let Some(version) = version {
                components.push(
                    ParameterClause::string(version_param.clone(), version)
                        .with_modifier(SearchModifier::Exact),
                );
            }
            ParameterValue::composite(components)
        })
        .collect();

    Ok(ParameterClause::new(clause.code.clone(), SearchParamType::Composite).with_values(values))
}

/// Checks the clause shape before anything is attached.
pub fn validate_clause(clause: &ParameterClause) -> Result<(), ParameterError> {
    if clause.values.is_empty() {
        return Err(ParameterError::NoValues {
            parameter: clause.code.clone(),
        });
    }

    if let Some(modifier) = &clause.modifier {
        if !modifier.is_valid_for(clause.param_type) {
            return Err(ParameterError::UnsupportedModifier {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
                modifier: modifier.to_string(),
            });
        }
    }

    if clause.modifier == Some(SearchModifier::Missing) {
        return Ok(());
    }

    let composite_type = clause.param_type == SearchParamType::Composite;
    for value in &clause.values {
        if value.is_composite() != composite_type {
            return Err(ParameterError::ValueShapeMismatch {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
            });
        }

        let prefixes: Vec<_> = match value {
            ParameterValue::DateRange { bounds } => bounds.iter().map(|b| b.prefix).collect(),
            other => other.prefix().into_iter().collect(),
        };
        if let Some(prefix) = prefixes.iter().find(|p| !p.is_valid_for(clause.param_type)) {
            return Err(ParameterError::InvalidPrefix {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
                prefix: prefix.to_string(),
            });
        }

        if let ParameterValue::Composite { components } = value {
            validate_components(&clause.code, components)?;
        }
    }

    Ok(())
}

fn validate_components(
    parameter: &str,
    components: &[ParameterClause],
) -> Result<(), ParameterError> {
    if components.is_empty() {
        return Err(ParameterError::NoValues {
            parameter: parameter.to_string(),
        });
    }
    for component in components {
        if component.param_type == SearchParamType::Composite
            || component.values.iter().any(ParameterValue::is_composite)
        {
            return Err(ParameterError::NestedComposite {
                parameter: parameter.to_string(),
            });
        }
        if component.is_chained() {
            return Err(ParameterError::NotSupportedHere {
                parameter: component.code.clone(),
                message: "composite components cannot be chained".to_string(),
            });
        }
        if component.values.len() != 1 {
            return Err(ParameterError::NotSupportedHere {
                parameter: component.code.clone(),
                message: "composite components take exactly one value".to_string(),
            });
        }
        validate_clause(component)?;
    }
    Ok(())
}
