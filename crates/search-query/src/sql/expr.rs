//! Scalar and boolean expressions.

use std::fmt;

use super::select::Select;
use super::{SqlFragment, SqlParam};

/// A column reference, optionally qualified by a table alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// The table alias, if any.
    pub qualifier: Option<String>,
    /// The column name.
    pub name: String,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// An SQL expression.
///
/// The `and`/`or` constructors fold constant operands away, so a predicate
/// built from unresolvable lookups collapses to a single `Bool`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column reference.
    Column(Column),
    /// A bound parameter.
    Param(SqlParam),
    /// A quoted string literal.
    Literal(String),
    /// A constant predicate, rendered as `1 = 1` or `1 = 0`.
    Bool(bool),
    /// `*`, for `COUNT(*)`.
    Star,
    /// `left op right`.
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    /// `expr LIKE pattern [ESCAPE 'c']`.
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<char>,
    },
    /// `expr [NOT] IN (list)`.
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `expr IS [NOT] NULL`.
    IsNull { expr: Box<Expr>, negated: bool },
    /// Conjunction.
    And(Vec<Expr>),
    /// Disjunction.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// `EXISTS (subquery)`.
    Exists(Box<Select>),
    /// `NOT EXISTS (subquery)`.
    NotExists(Box<Select>),
    /// A function call such as `MIN(x)`.
    Function { name: &'static str, args: Vec<Expr> },
}

impl Expr {
    /// A qualified column reference.
    pub fn col(qualifier: &str, name: &str) -> Self {
        Expr::Column(Column {
            qualifier: Some(qualifier.to_string()),
            name: name.to_string(),
        })
    }

    /// An unqualified column reference.
    pub fn bare_col(name: &str) -> Self {
        Expr::Column(Column {
            qualifier: None,
            name: name.to_string(),
        })
    }

    /// A bound parameter.
    pub fn param(param: SqlParam) -> Self {
        Expr::Param(param)
    }

    /// A bound string.
    pub fn string(value: impl Into<String>) -> Self {
        Expr::Param(SqlParam::string(value))
    }

    /// A bound integer.
    pub fn integer(value: i64) -> Self {
        Expr::Param(SqlParam::Integer(value))
    }

    /// A quoted literal. Only for constants known at build time.
    pub fn literal(value: &str) -> Self {
        Expr::Literal(value.to_string())
    }

    /// Conjunction of the given predicates, with constants folded.
    pub fn and<I: IntoIterator<Item = Expr>>(exprs: I) -> Self {
        let mut terms = Vec::new();
        for expr in exprs {
            match expr {
                Expr::Bool(true) => {}
                Expr::Bool(false) => return Expr::Bool(false),
                Expr::And(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Expr::Bool(true),
            1 => terms.remove(0),
            _ => Expr::And(terms),
        }
    }

    /// Disjunction of the given predicates, with constants folded.
    pub fn or<I: IntoIterator<Item = Expr>>(exprs: I) -> Self {
        let mut terms = Vec::new();
        for expr in exprs {
            match expr {
                Expr::Bool(false) => {}
                Expr::Bool(true) => return Expr::Bool(true),
                Expr::Or(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Expr::Bool(false),
            1 => terms.remove(0),
            _ => Expr::Or(terms),
        }
    }

    /// Logical negation.
    pub fn negate(self) -> Self {
        match self {
            Expr::Bool(b) => Expr::Bool(!b),
            Expr::Not(inner) => *inner,
            Expr::Exists(select) => Expr::NotExists(select),
            Expr::NotExists(select) => Expr::Exists(select),
            other => Expr::Not(Box::new(other)),
        }
    }

    /// `EXISTS (select)`.
    pub fn exists(select: Select) -> Self {
        Expr::Exists(Box::new(select))
    }

    /// `NOT EXISTS (select)`.
    pub fn not_exists(select: Select) -> Self {
        Expr::NotExists(Box::new(select))
    }

    /// A function call.
    pub fn function(name: &'static str, args: Vec<Expr>) -> Self {
        Expr::Function { name, args }
    }

    /// `COUNT(*)`.
    pub fn count_star() -> Self {
        Expr::function("COUNT", vec![Expr::Star])
    }

    /// `self op rhs`.
    pub fn compare(self, op: CompareOp, rhs: Expr) -> Self {
        Expr::Compare {
            left: Box::new(self),
            op,
            right: Box::new(rhs),
        }
    }

    /// `self = rhs`.
    pub fn equals(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Eq, rhs)
    }

    /// `self LIKE pattern ESCAPE 'escape'`.
    pub fn like(self, pattern: impl Into<String>, escape: char) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(Expr::string(pattern)),
            escape: Some(escape),
        }
    }

    /// `self IN (list)`. A single element becomes `=`, an empty list `false`.
    pub fn in_list(self, mut list: Vec<Expr>) -> Self {
        match list.len() {
            0 => Expr::Bool(false),
            1 => self.equals(list.remove(0)),
            _ => Expr::InList {
                expr: Box::new(self),
                list,
                negated: false,
            },
        }
    }

    /// `self IS NULL`.
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// Returns true for the constant `false`.
    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Bool(false))
    }

    /// Returns true for the constant `true`.
    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Bool(true))
    }

    /// Returns true if the expression, including nested subqueries, refers
    /// to `qualifier.name`.
    pub fn references(&self, qualifier: &str, name: &str) -> bool {
        let mut found = false;
        self.visit_columns(&mut |c| {
            if c.name == name && c.qualifier.as_deref() == Some(qualifier) {
                found = true;
            }
        });
        found
    }

    /// Calls `f` for every column referenced, including inside subqueries.
    pub fn visit_columns(&self, f: &mut dyn FnMut(&Column)) {
        match self {
            Expr::Column(c) => f(c),
            Expr::Param(_) | Expr::Literal(_) | Expr::Bool(_) | Expr::Star => {}
            Expr::Compare { left, right, .. } => {
                left.visit_columns(f);
                right.visit_columns(f);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.visit_columns(f);
                pattern.visit_columns(f);
            }
            Expr::InList { expr, list, .. } => {
                expr.visit_columns(f);
                list.iter().for_each(|e| e.visit_columns(f));
            }
            Expr::IsNull { expr, .. } | Expr::Not(expr) => expr.visit_columns(f),
            Expr::And(terms) | Expr::Or(terms) => terms.iter().for_each(|e| e.visit_columns(f)),
            Expr::Function { args, .. } => args.iter().for_each(|e| e.visit_columns(f)),
            Expr::Exists(select) | Expr::NotExists(select) => select.visit_columns(f),
        }
    }

    fn is_compound(&self) -> bool {
        matches!(
            self,
            Expr::Compare { .. }
                | Expr::Like { .. }
                | Expr::InList { .. }
                | Expr::IsNull { .. }
                | Expr::And(_)
                | Expr::Or(_)
                | Expr::Not(_)
                | Expr::Bool(_)
        )
    }

    fn render_operand(&self, out: &mut SqlFragment) {
        if self.is_compound() {
            out.push("(");
            self.render(out);
            out.push(")");
        } else {
            self.render(out);
        }
    }

    fn render_terms(terms: &[Expr], separator: &str, out: &mut SqlFragment) {
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            if matches!(term, Expr::And(_) | Expr::Or(_)) {
                out.push("(");
                term.render(out);
                out.push(")");
            } else {
                term.render(out);
            }
        }
    }

    /// Appends the expression to `out`, binding parameters as it goes.
    pub fn render(&self, out: &mut SqlFragment) {
        match self {
            Expr::Column(c) => out.push(&c.to_string()),
            Expr::Param(p) => out.push_param(p.clone()),
            Expr::Literal(s) => {
                out.push("'");
                out.push(&s.replace('\'', "''"));
                out.push("'");
            }
            Expr::Bool(true) => out.push("1 = 1"),
            Expr::Bool(false) => out.push("1 = 0"),
            Expr::Star => out.push("*"),
            Expr::Compare { left, op, right } => {
                left.render_operand(out);
                out.push(" ");
                out.push(op.as_sql());
                out.push(" ");
                right.render_operand(out);
            }
            Expr::Like {
                expr,
                pattern,
                escape,
            } => {
                expr.render_operand(out);
                out.push(" LIKE ");
                pattern.render_operand(out);
                if let Some(c) = escape {
                    out.push(&format!(" ESCAPE '{}'", c));
                }
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                expr.render_operand(out);
                out.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        out.push(", ");
                    }
                    item.render(out);
                }
                out.push(")");
            }
            Expr::IsNull { expr, negated } => {
                expr.render_operand(out);
                out.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::And(terms) => Self::render_terms(terms, " AND ", out),
            Expr::Or(terms) => Self::render_terms(terms, " OR ", out),
            Expr::Not(inner) => {
                out.push("NOT (");
                inner.render(out);
                out.push(")");
            }
            Expr::Exists(select) => {
                out.push("EXISTS (");
                select.render_into(out);
                out.push(")");
            }
            Expr::NotExists(select) => {
                out.push("NOT EXISTS (");
                select.render_into(out);
                out.push(")");
            }
            Expr::Function { name, args } => {
                out.push(name);
                out.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(", ");
                    }
                    arg.render(out);
                }
                out.push(")");
            }
        }
    }

    /// Renders the expression on its own.
    pub fn to_fragment(&self) -> SqlFragment {
        let mut out = SqlFragment::new("");
        self.render(&mut out);
        out
    }
}

impl From<SqlParam> for Expr {
    fn from(param: SqlParam) -> Self {
        Expr::Param(param)
    }
}
