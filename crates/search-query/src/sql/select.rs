//! SELECT statements.

use super::SqlFragment;
use super::expr::{Column, Expr};

/// One output column.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    /// The selected expression.
    pub expr: Expr,
    /// `AS` alias.
    pub alias: Option<String>,
}

/// A row source in a FROM or JOIN clause. Every source carries an alias.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// A named table or view.
    Table { name: String, alias: String },
    /// A derived table.
    Subquery { query: Box<Select>, alias: String },
    /// `(m1 UNION ALL m2 ...) alias`.
    UnionAll { members: Vec<Select>, alias: String },
}

impl TableRef {
    /// A named table.
    pub fn table(name: impl Into<String>, alias: impl Into<String>) -> Self {
        TableRef::Table {
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// A derived table.
    pub fn subquery(query: Select, alias: impl Into<String>) -> Self {
        TableRef::Subquery {
            query: Box::new(query),
            alias: alias.into(),
        }
    }

    /// The alias the source is visible under.
    pub fn alias(&self) -> &str {
        match self {
            TableRef::Table { alias, .. }
            | TableRef::Subquery { alias, .. }
            | TableRef::UnionAll { alias, .. } => alias,
        }
    }

    fn render_into(&self, out: &mut SqlFragment) {
        match self {
            TableRef::Table { name, alias } => {
                out.push(name);
                out.push(" ");
                out.push(alias);
            }
            TableRef::Subquery { query, alias } => {
                out.push("(");
                query.render_into(out);
                out.push(") ");
                out.push(alias);
            }
            TableRef::UnionAll { members, alias } => {
                out.push("(");
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        out.push(" UNION ALL ");
                    }
                    member.render_into(out);
                }
                out.push(") ");
                out.push(alias);
            }
        }
    }

    fn collect_aliases(&self, aliases: &mut Vec<String>) {
        aliases.push(self.alias().to_string());
        match self {
            TableRef::Table { .. } => {}
            TableRef::Subquery { query, .. } => query.collect_aliases(aliases),
            TableRef::UnionAll { members, .. } => {
                members.iter().for_each(|m| m.collect_aliases(aliases))
            }
        }
    }
}

/// Join kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT OUTER JOIN`
    LeftOuter,
}

/// A join.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join kind.
    pub kind: JoinKind,
    /// The joined source.
    pub table: TableRef,
    /// The join condition.
    pub on: Expr,
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// `ASC`
    Asc,
    /// `DESC`
    Desc,
}

/// An ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// The sort expression.
    pub expr: Expr,
    /// Direction.
    pub order: SortOrder,
    /// Whether NULLs sort after every value.
    pub nulls_last: bool,
}

impl OrderBy {
    /// Ascending, NULLs last.
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            order: SortOrder::Asc,
            nulls_last: true,
        }
    }

    /// Descending, NULLs last.
    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            order: SortOrder::Desc,
            nulls_last: true,
        }
    }
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// Output columns. Empty renders as `SELECT 1`.
    pub columns: Vec<SelectItem>,
    /// The primary row source.
    pub from: Option<TableRef>,
    /// Joins, in order.
    pub joins: Vec<Join>,
    /// WHERE terms, ANDed.
    pub filters: Vec<Expr>,
    /// GROUP BY terms.
    pub group_by: Vec<Expr>,
    /// ORDER BY terms.
    pub order_by: Vec<OrderBy>,
    /// LIMIT.
    pub limit: Option<u64>,
    /// OFFSET. Only rendered together with a limit.
    pub offset: Option<u64>,
}

impl Select {
    /// An empty statement.
    pub fn new() -> Self {
        Self::default()
    }

    /// `SELECT ... FROM name alias`.
    pub fn from_table(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            from: Some(TableRef::table(name, alias)),
            ..Self::default()
        }
    }

    /// Sets the primary row source.
    pub fn with_from(mut self, from: TableRef) -> Self {
        self.from = Some(from);
        self
    }

    /// Adds an output column.
    pub fn with_column(mut self, expr: Expr) -> Self {
        self.add_column(expr, None);
        self
    }

    /// Adds an aliased output column.
    pub fn with_column_as(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.add_column(expr, Some(alias.into()));
        self
    }

    /// Adds a WHERE term.
    pub fn with_filter(mut self, expr: Expr) -> Self {
        self.add_filter(expr);
        self
    }

    /// Adds an output column.
    pub fn add_column(&mut self, expr: Expr, alias: Option<String>) {
        self.columns.push(SelectItem { expr, alias });
    }

    /// Adds a WHERE term. Constant `true` terms are dropped.
    pub fn add_filter(&mut self, expr: Expr) {
        if !expr.is_true() {
            self.filters.push(expr);
        }
    }

    /// Adds a join.
    pub fn add_join(&mut self, kind: JoinKind, table: TableRef, on: Expr) {
        self.joins.push(Join { kind, table, on });
    }

    /// Adds a GROUP BY term.
    pub fn add_group_by(&mut self, expr: Expr) {
        self.group_by.push(expr);
    }

    /// Adds an ORDER BY term.
    pub fn add_order_by(&mut self, order: OrderBy) {
        self.order_by.push(order);
    }

    /// Sets LIMIT and OFFSET.
    pub fn set_window(&mut self, offset: u64, limit: u64) {
        self.offset = Some(offset);
        self.limit = Some(limit);
    }

    /// Returns true if the statement has a source named `alias`.
    pub fn has_alias(&self, alias: &str) -> bool {
        self.from.as_ref().map(|f| f.alias() == alias).unwrap_or(false)
            || self.joins.iter().any(|j| j.table.alias() == alias)
    }

    /// Every table alias declared in the statement, including inside
    /// derived tables and subqueries, in declaration order.
    pub fn table_aliases(&self) -> Vec<String> {
        let mut aliases = Vec::new();
        self.collect_aliases(&mut aliases);
        aliases
    }

    fn collect_aliases(&self, aliases: &mut Vec<String>) {
        for item in &self.columns {
            collect_expr_aliases(&item.expr, aliases);
        }
        if let Some(from) = &self.from {
            from.collect_aliases(aliases);
        }
        for join in &self.joins {
            join.table.collect_aliases(aliases);
            collect_expr_aliases(&join.on, aliases);
        }
        for filter in &self.filters {
            collect_expr_aliases(filter, aliases);
        }
    }

    /// Calls `f` for every column referenced anywhere in the statement.
    pub fn visit_columns(&self, f: &mut dyn FnMut(&Column)) {
        for item in &self.columns {
            item.expr.visit_columns(f);
        }
        match &self.from {
            Some(TableRef::Subquery { query, .. }) => query.visit_columns(f),
            Some(TableRef::UnionAll { members, .. }) => {
                members.iter().for_each(|m| m.visit_columns(f))
            }
            _ => {}
        }
        for join in &self.joins {
            if let TableRef::Subquery { query, .. } = &join.table {
                query.visit_columns(f);
            }
            join.on.visit_columns(f);
        }
        for expr in self.filters.iter().chain(self.group_by.iter()) {
            expr.visit_columns(f);
        }
        for order in &self.order_by {
            order.expr.visit_columns(f);
        }
    }

    /// Renders the statement.
    pub fn render(&self) -> SqlFragment {
        let mut out = SqlFragment::new("");
        self.render_into(&mut out);
        out
    }

    /// Appends the statement to `out`, continuing its parameter numbering.
    pub fn render_into(&self, out: &mut SqlFragment) {
        out.push(if self.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        if self.columns.is_empty() {
            out.push("1");
        }
        for (i, item) in self.columns.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            item.expr.render(out);
            if let Some(alias) = &item.alias {
                out.push(" AS ");
                out.push(alias);
            }
        }

        if let Some(from) = &self.from {
            out.push(" FROM ");
            from.render_into(out);
        }

        for join in &self.joins {
            out.push(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::LeftOuter => " LEFT OUTER JOIN ",
            });
            join.table.render_into(out);
            out.push(" ON ");
            join.on.render(out);
        }

        if !self.filters.is_empty() {
            let filter = Expr::and(self.filters.iter().cloned());
            if !filter.is_true() {
                out.push(" WHERE ");
                filter.render(out);
            }
        }

        if !self.group_by.is_empty() {
            out.push(" GROUP BY ");
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                expr.render(out);
            }
        }

        if !self.order_by.is_empty() {
            out.push(" ORDER BY ");
            for (i, order) in self.order_by.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                order.expr.render(out);
                out.push(match order.order {
                    SortOrder::Asc => " ASC",
                    SortOrder::Desc => " DESC",
                });
                if order.nulls_last {
                    out.push(" NULLS LAST");
                }
            }
        }

        if let Some(limit) = self.limit {
            out.push(&format!(" LIMIT {}", limit));
            if let Some(offset) = self.offset {
                out.push(&format!(" OFFSET {}", offset));
            }
        }
    }
}

fn collect_expr_aliases(expr: &Expr, aliases: &mut Vec<String>) {
    match expr {
        Expr::Exists(select) | Expr::NotExists(select) => select.collect_aliases(aliases),
        Expr::And(terms) | Expr::Or(terms) => {
            terms.iter().for_each(|t| collect_expr_aliases(t, aliases))
        }
        Expr::Not(inner) => collect_expr_aliases(inner, aliases),
        _ => {}
    }
}
