//! Reference hops.
//!
//! A hop joins the reference rows of the current resource and then the
//! logical resources they point at (forward), or the reference rows that
//! point at the current resource and their owners (reverse). Canonical hops
//! match on url strings instead of surrogate ids.

use crate::compiler::{canonical_url_parameter, canonical_version_parameter};
use crate::config::ReferenceVersionPolicy;
use crate::renderer::schema::{self, ParamTable};
use crate::sql::{Expr, JoinKind, TableRef};
use crate::types::ChainHop;

use super::{Ctx, SqlQueryRenderer, id_equals};

/// Parameter holding a definitional resource's canonical url.
const URL_PARAMETER: &str = "url";

/// Parameter holding a definitional resource's business version.
const VERSION_PARAMETER: &str = "version";

/// `target.IS_DELETED = 'N'`.
fn live(alias: &str) -> Expr {
    Expr::col(alias, schema::IS_DELETED).equals(Expr::literal(schema::NOT_DELETED))
}

/// A reference row pinned to a version only matches that version of its
/// target, when pinned references must be current.
pub(crate) fn version_predicate(
    renderer: &SqlQueryRenderer<'_>,
    reference_alias: &str,
    target_alias: &str,
) -> Expr {
    match renderer.lookups().config.reference_version_policy {
        ReferenceVersionPolicy::PinnedMustBeCurrent => Expr::function(
            "COALESCE",
            vec![
                Expr::col(reference_alias, schema::REF_VERSION_ID),
                Expr::col(target_alias, schema::VERSION_ID),
            ],
        )
        .equals(Expr::col(target_alias, schema::VERSION_ID)),
        ReferenceVersionPolicy::IgnorePinnedVersion => Expr::Bool(true),
    }
}

/// Follows a reference held by the current resource.
pub(crate) fn forward_hop(renderer: &SqlQueryRenderer<'_>, mut ctx: Ctx, hop: &ChainHop) -> Ctx {
    if hop.canonical {
        return forward_canonical_hop(renderer, ctx, hop);
    }

    let source_type = ctx.entity_type().to_string();
    let source_alias = ctx.entity_alias().to_string();
    let reference_alias = ctx.aliases().parameter();
    let target_alias = ctx.aliases().entity();

    let references = Expr::and([
        SqlQueryRenderer::correlation(&reference_alias, &source_alias),
        renderer.parameter_name_predicate(
            &reference_alias,
            ParamTable::TokenValues,
            &hop.reference_param,
        ),
        id_equals(
            Expr::col(&reference_alias, schema::CODE_SYSTEM_ID),
            renderer.lookups().code_system(&hop.resource_type),
        ),
    ]);
    let targets = Expr::and([
        Expr::col(&target_alias, schema::LOGICAL_ID)
            .equals(Expr::col(&reference_alias, schema::TOKEN_VALUE)),
        live(&target_alias),
        version_predicate(renderer, &reference_alias, &target_alias),
    ]);

    let builder = ctx.builder_mut();
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(
            schema::parameter_table(&source_type, ParamTable::TokenValues),
            &reference_alias,
        ),
        references,
    );
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(schema::logical_resources(&hop.resource_type), &target_alias),
        targets,
    );

    tracing::trace!(
        from = %source_type,
        to = %hop.resource_type,
        alias = %target_alias,
        "Forward hop"
    );
    ctx.hop(target_alias, reference_alias, hop.resource_type.as_str())
}

/// Follows references from `hop.resource_type` that point at the current
/// resource.
pub(crate) fn reverse_hop(renderer: &SqlQueryRenderer<'_>, mut ctx: Ctx, hop: &ChainHop) -> Ctx {
    if hop.canonical {
        return reverse_canonical_hop(renderer, ctx, hop);
    }

    let target_type = ctx.entity_type().to_string();
    let target_alias = ctx.entity_alias().to_string();
    let reference_alias = ctx.aliases().parameter();
    let source_alias = ctx.aliases().entity();

    let references = Expr::and([
        Expr::col(&reference_alias, schema::TOKEN_VALUE)
            .equals(Expr::col(&target_alias, schema::LOGICAL_ID)),
        renderer.parameter_name_predicate(
            &reference_alias,
            ParamTable::TokenValues,
            &hop.reference_param,
        ),
        id_equals(
            Expr::col(&reference_alias, schema::CODE_SYSTEM_ID),
            renderer.lookups().code_system(&target_type),
        ),
        version_predicate(renderer, &reference_alias, &target_alias),
    ]);
    let sources = Expr::and([
        Expr::col(&source_alias, schema::LOGICAL_RESOURCE_ID)
            .equals(Expr::col(&reference_alias, schema::LOGICAL_RESOURCE_ID)),
        live(&source_alias),
    ]);

    let builder = ctx.builder_mut();
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(
            schema::parameter_table(&hop.resource_type, ParamTable::TokenValues),
            &reference_alias,
        ),
        references,
    );
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(schema::logical_resources(&hop.resource_type), &source_alias),
        sources,
    );

    tracing::trace!(
        from = %target_type,
        to = %hop.resource_type,
        alias = %source_alias,
        "Reverse hop"
    );
    ctx.hop(source_alias, reference_alias, hop.resource_type.as_str())
}

/// Joins a string row of `parameter` owned by `owner_alias`.
fn string_row(
    renderer: &SqlQueryRenderer<'_>,
    alias: &str,
    owner_alias: &str,
    parameter: &str,
) -> Expr {
    Expr::and([
        SqlQueryRenderer::correlation(alias, owner_alias),
        renderer.parameter_name_predicate(alias, ParamTable::Strings, parameter),
    ])
}

/// An unversioned canonical reference matches any version of the target.
fn version_matches(reference_version: &str, target_version: &str) -> Expr {
    Expr::or([
        Expr::col(reference_version, schema::STR_VALUE).is_null(),
        Expr::col(reference_version, schema::STR_VALUE)
            .equals(Expr::col(target_version, schema::STR_VALUE)),
    ])
}

fn forward_canonical_hop(renderer: &SqlQueryRenderer<'_>, mut ctx: Ctx, hop: &ChainHop) -> Ctx {
    let source_type = ctx.entity_type().to_string();
    let source_alias = ctx.entity_alias().to_string();
    let aliases = ctx.aliases().clone();
    let url_alias = aliases.parameter();
    let version_alias = aliases.parameter();
    let target_url_alias = aliases.parameter();
    let target_alias = aliases.entity();
    let target_version_alias = aliases.parameter();

    let source_table = schema::parameter_table(&source_type, ParamTable::Strings);
    let target_table = schema::parameter_table(&hop.resource_type, ParamTable::Strings);

    let builder = ctx.builder_mut();
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(&source_table, &url_alias),
        string_row(
            renderer,
            &url_alias,
            &source_alias,
            &canonical_url_parameter(&hop.reference_param),
        ),
    );
    builder.add_join(
        JoinKind::LeftOuter,
        TableRef::table(&source_table, &version_alias),
        Expr::and([
            string_row(
                renderer,
                &version_alias,
                &source_alias,
                &canonical_version_parameter(&hop.reference_param),
            ),
            Expr::col(&version_alias, schema::COMPOSITE_ID)
                .equals(Expr::col(&url_alias, schema::COMPOSITE_ID)),
        ]),
    );
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(&target_table, &target_url_alias),
        Expr::and([
            Expr::col(&target_url_alias, schema::STR_VALUE)
                .equals(Expr::col(&url_alias, schema::STR_VALUE)),
            renderer.parameter_name_predicate(
                &target_url_alias,
                ParamTable::Strings,
                URL_PARAMETER,
            ),
        ]),
    );
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(schema::logical_resources(&hop.resource_type), &target_alias),
        Expr::and([
            SqlQueryRenderer::correlation(&target_alias, &target_url_alias),
            live(&target_alias),
        ]),
    );
    builder.add_join(
        JoinKind::LeftOuter,
        TableRef::table(&target_table, &target_version_alias),
        string_row(renderer, &target_version_alias, &target_alias, VERSION_PARAMETER),
    );
    builder.add_filter(version_matches(&version_alias, &target_version_alias));

    tracing::trace!(from = %source_type, to = %hop.resource_type, alias = %target_alias, "Forward canonical hop");
    ctx.hop(target_alias, target_url_alias, hop.resource_type.as_str())
}

fn reverse_canonical_hop(renderer: &SqlQueryRenderer<'_>, mut ctx: Ctx, hop: &ChainHop) -> Ctx {
    let target_type = ctx.entity_type().to_string();
    let target_alias = ctx.entity_alias().to_string();
    let aliases = ctx.aliases().clone();
    let target_url_alias = aliases.parameter();
    let target_version_alias = aliases.parameter();
    let url_alias = aliases.parameter();
    let source_alias = aliases.entity();
    let version_alias = aliases.parameter();

    let target_table = schema::parameter_table(&target_type, ParamTable::Strings);
    let source_table = schema::parameter_table(&hop.resource_type, ParamTable::Strings);

    let builder = ctx.builder_mut();
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(&target_table, &target_url_alias),
        string_row(renderer, &target_url_alias, &target_alias, URL_PARAMETER),
    );
    builder.add_join(
        JoinKind::LeftOuter,
        TableRef::table(&target_table, &target_version_alias),
        string_row(renderer, &target_version_alias, &target_alias, VERSION_PARAMETER),
    );
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(&source_table, &url_alias),
        Expr::and([
            Expr::col(&url_alias, schema::STR_VALUE)
                .equals(Expr::col(&target_url_alias, schema::STR_VALUE)),
            renderer.parameter_name_predicate(
                &url_alias,
                ParamTable::Strings,
                &canonical_url_parameter(&hop.reference_param),
            ),
        ]),
    );
    builder.add_join(
        JoinKind::Inner,
        TableRef::table(schema::logical_resources(&hop.resource_type), &source_alias),
        Expr::and([
            SqlQueryRenderer::correlation(&source_alias, &url_alias),
            live(&source_alias),
        ]),
    );
    builder.add_join(
        JoinKind::LeftOuter,
        TableRef::table(&source_table, &version_alias),
        Expr::and([
            string_row(
                renderer,
                &version_alias,
                &source_alias,
                &canonical_version_parameter(&hop.reference_param),
            ),
            Expr::col(&version_alias, schema::COMPOSITE_ID)
                .equals(Expr::col(&url_alias, schema::COMPOSITE_ID)),
        ]),
    );
    builder.add_filter(version_matches(&version_alias, &target_version_alias));

    tracing::trace!(from = %target_type, to = %hop.resource_type, alias = %source_alias, "Reverse canonical hop");
    ctx.hop(source_alias, url_alias, hop.resource_type.as_str())
}
