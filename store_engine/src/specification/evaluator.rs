use sqlx::{QueryBuilder, Sqlite};

use crate::{
    db_types::Entity,
    specification::{Expr, Specification, Value},
};

/// Translates a [`Specification`] into an executable SQL query.
///
/// The clause order is load-bearing: criteria first, then ordering, then paging, so a page is always a window into
/// the filtered-and-ordered sequence. Deduplication applies to the base row shape; when a projection is present, the
/// deduplicated base query is wrapped in a subquery and the projection selects from the outside. A projection that
/// collapses otherwise-distinct rows can therefore yield duplicate projected values.
///
/// This is a pure function over the specification. It composes a query; it never executes one.
pub struct SpecificationEvaluator;

impl SpecificationEvaluator {
    /// Render `spec` into a row query against `T::TABLE`.
    pub fn query<T: Entity>(spec: &Specification<T>) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new("");
        if let Some(columns) = spec.select() {
            qb.push("SELECT ");
            qb.push(columns.join(", "));
            qb.push(" FROM (");
        }
        qb.push(if spec.is_distinct() { "SELECT DISTINCT * FROM " } else { "SELECT * FROM " });
        qb.push(T::TABLE);
        if let Some(criteria) = spec.criteria() {
            qb.push(" WHERE ");
            push_expr(&mut qb, criteria);
        }
        // Ascending is applied first and descending overrides it, so the descending key wins when both are set.
        // That mirrors the long-standing behaviour callers rely on; exclusivity is not enforced here.
        match (spec.order_by(), spec.order_by_descending()) {
            (_, Some(key)) => {
                qb.push(" ORDER BY ");
                qb.push(key);
                qb.push(" DESC");
            },
            (Some(key), None) => {
                qb.push(" ORDER BY ");
                qb.push(key);
                qb.push(" ASC");
            },
            (None, None) => {},
        }
        // DISTINCT is part of the base SELECT, so SQLite deduplicates before the LIMIT window is cut. Base rows
        // always carry the table's unique id column, so no two of them compare equal and the window is unaffected.
        if spec.is_paging_enabled() {
            qb.push(" LIMIT ");
            qb.push_bind(spec.take());
            qb.push(" OFFSET ");
            qb.push_bind(spec.skip());
        }
        if spec.select().is_some() {
            qb.push(")");
        }
        qb
    }

    /// Render `spec` into a match-count query. Only the criteria apply: the count of a paged specification is the
    /// un-paged match count.
    pub fn count_query<T: Entity>(spec: &Specification<T>) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
        qb.push(T::TABLE);
        if let Some(criteria) = spec.criteria() {
            qb.push(" WHERE ");
            push_expr(&mut qb, criteria);
        }
        qb
    }
}

fn push_expr(qb: &mut QueryBuilder<'static, Sqlite>, expr: &Expr) {
    match expr {
        Expr::Eq(column, value) => {
            qb.push(*column);
            qb.push(" = ");
            push_value(qb, value);
        },
        Expr::Like(column, pattern) => {
            qb.push(*column);
            qb.push(" LIKE ");
            qb.push_bind(pattern.clone());
        },
        Expr::In(column, values) => {
            if values.is_empty() {
                // IN () is not valid SQLite; an empty set matches nothing.
                qb.push("1 = 0");
                return;
            }
            qb.push(*column);
            qb.push(" IN (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(qb, value);
            }
            qb.push(")");
        },
        Expr::And(parts) => push_joined(qb, parts, " AND "),
        Expr::Or(parts) => push_joined(qb, parts, " OR "),
        Expr::Not(inner) => {
            qb.push("NOT (");
            push_expr(qb, inner);
            qb.push(")");
        },
    }
}

fn push_joined(qb: &mut QueryBuilder<'static, Sqlite>, parts: &[Expr], joiner: &str) {
    if parts.is_empty() {
        qb.push("1 = 1");
        return;
    }
    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        push_expr(qb, part);
    }
    qb.push(")");
}

fn push_value(qb: &mut QueryBuilder<'static, Sqlite>, value: &Value) {
    match value {
        Value::Int(v) => qb.push_bind(*v),
        Value::Text(v) => qb.push_bind(v.clone()),
        Value::Bool(v) => qb.push_bind(*v),
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db_types::{Order, Product};

    #[test]
    fn bare_spec_selects_everything() {
        let spec = Specification::<Product>::new(None);
        assert_eq!(SpecificationEvaluator::query(&spec).sql(), "SELECT * FROM products");
        assert_eq!(SpecificationEvaluator::count_query(&spec).sql(), "SELECT COUNT(*) FROM products");
    }

    #[test]
    fn criteria_then_order_then_paging() {
        let spec = Specification::<Product>::new(Some(Expr::eq("brand", "Acme")))
            .with_order_by("name")
            .with_paging(10, 5);
        assert_eq!(
            SpecificationEvaluator::query(&spec).sql(),
            "SELECT * FROM products WHERE brand = ? ORDER BY name ASC LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn descending_key_wins_when_both_are_set() {
        let spec = Specification::<Product>::new(None)
            .with_order_by("name")
            .with_order_by_descending("price");
        assert_eq!(SpecificationEvaluator::query(&spec).sql(), "SELECT * FROM products ORDER BY price DESC");
    }

    #[test]
    fn distinct_applies_before_projection() {
        let spec = Specification::<Product>::new(None)
            .with_distinct()
            .with_order_by("brand")
            .with_select(vec!["brand"]);
        assert_eq!(
            SpecificationEvaluator::query(&spec).sql(),
            "SELECT brand FROM (SELECT DISTINCT * FROM products ORDER BY brand ASC)"
        );
    }

    #[test]
    fn distinct_combines_with_paging() {
        let spec = Specification::<Product>::new(None).with_distinct().with_paging(10, 0);
        assert_eq!(
            SpecificationEvaluator::query(&spec).sql(),
            "SELECT DISTINCT * FROM products LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn filter_algebra_composes() {
        let criteria = Expr::and([
            Expr::like("name", "%boot%"),
            Expr::Or(vec![Expr::is_in("brand", ["Acme", "Globex"]), Expr::eq("brand", "Initech")]),
            Expr::Not(Box::new(Expr::eq("quantity_in_stock", 0))),
        ])
        .unwrap();
        let spec = Specification::<Product>::new(Some(criteria));
        assert_eq!(
            SpecificationEvaluator::query(&spec).sql(),
            "SELECT * FROM products WHERE (name LIKE ? AND (brand IN (?, ?) OR brand = ?) AND NOT \
             (quantity_in_stock = ?))"
        );
    }

    #[test]
    fn empty_in_matches_nothing() {
        let spec = Specification::<Product>::new(Some(Expr::is_in("brand", Vec::<String>::new())));
        assert_eq!(SpecificationEvaluator::query(&spec).sql(), "SELECT * FROM products WHERE 1 = 0");
    }

    #[test]
    fn count_ignores_paging_and_ordering() {
        let spec = Specification::<Order>::new(Some(Expr::eq("buyer_email", "b@example.com")))
            .with_order_by("order_date")
            .with_paging(20, 10);
        assert_eq!(
            SpecificationEvaluator::count_query(&spec).sql(),
            "SELECT COUNT(*) FROM orders WHERE buyer_email = ?"
        );
    }
}
