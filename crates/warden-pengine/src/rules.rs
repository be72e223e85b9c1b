//! Location rules: attribute expressions evaluated against each node.

use crate::node::Node;
use crate::types::NodeId;
use std::cmp::Ordering;
use tracing::{trace, warn};
use warden_core::cib::{BooleanOp, ExpressionConfig, ExpressionOp, RuleConfig, ValueType};
use warden_core::parse_score;

/// Compare two attribute values as the expression's type says
fn compare(lhs: &str, rhs: &str, value_type: ValueType) -> Option<Ordering> {
    match value_type {
        ValueType::String => Some(lhs.cmp(rhs)),
        ValueType::Number => {
            let l: f64 = lhs.trim().parse().ok()?;
            let r: f64 = rhs.trim().parse().ok()?;
            l.partial_cmp(&r)
        }
        ValueType::Version => Some(compare_versions(lhs, rhs)),
    }
}

/// Compare dotted version strings component by component; missing
/// components count as zero
fn compare_versions(lhs: &str, rhs: &str) -> Ordering {
    let parts = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (l, r) = (parts(lhs), parts(rhs));
    for idx in 0..l.len().max(r.len()) {
        let a = l.get(idx).copied().unwrap_or(0);
        let b = r.get(idx).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Whether one expression holds on `node`
pub fn evaluate_expression(expr: &ExpressionConfig, node: &Node) -> bool {
    let actual = node.attr(&expr.attribute);
    match expr.operation {
        ExpressionOp::Defined => return actual.is_some(),
        ExpressionOp::NotDefined => return actual.is_none(),
        _ => {}
    }

    let Some(expected) = expr.value.as_deref() else {
        warn!("Expression on {} has no value to compare with", expr.attribute);
        return false;
    };
    let Some(actual) = actual else {
        return expr.operation == ExpressionOp::Ne;
    };
    let Some(ordering) = compare(actual, expected, expr.value_type) else {
        trace!("Cannot compare '{}' with '{}' as {:?}", actual, expected, expr.value_type);
        return false;
    };

    match expr.operation {
        ExpressionOp::Lt => ordering == Ordering::Less,
        ExpressionOp::Gt => ordering == Ordering::Greater,
        ExpressionOp::Lte => ordering != Ordering::Greater,
        ExpressionOp::Gte => ordering != Ordering::Less,
        ExpressionOp::Eq => ordering == Ordering::Equal,
        ExpressionOp::Ne => ordering != Ordering::Equal,
        ExpressionOp::Defined | ExpressionOp::NotDefined => false,
    }
}

/// Whether a whole rule holds on `node`; a rule without expressions always does
pub fn evaluate_rule(rule: &RuleConfig, node: &Node) -> bool {
    if rule.expressions.is_empty() {
        return true;
    }
    match rule.boolean_op {
        BooleanOp::And => rule.expressions.iter().all(|e| evaluate_expression(e, node)),
        BooleanOp::Or => rule.expressions.iter().any(|e| evaluate_expression(e, node)),
    }
}

/// Score a rule gives `node`: the fixed score, or the value of its score
/// attribute on the node
pub fn rule_score(rule: &RuleConfig, node: &Node) -> i32 {
    if let Some(attribute) = &rule.score_attribute {
        return node
            .attr(attribute)
            .and_then(|v| parse_score(v).ok())
            .unwrap_or(0);
    }
    rule.score.map(|s| s.get()).unwrap_or(0)
}

/// The (node, score) pairs of every node the rule matches
pub fn resolve_rule(rule: &RuleConfig, nodes: &[Node]) -> Vec<(NodeId, i32)> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| evaluate_rule(rule, node))
        .map(|(idx, node)| (NodeId(idx), rule_score(rule, node)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::types::NodeType;
    use warden_core::{ScoreValue, INFINITY};

    fn create_test_node(id: &str, attrs: &[(&str, &str)]) -> Node {
        let mut node = Node::new(id, id, NodeType::Member);
        for (k, v) in attrs {
            node.attrs.insert(k.to_string(), v.to_string());
        }
        node
    }

    fn expr(attribute: &str, operation: ExpressionOp, value: Option<&str>, value_type: ValueType) -> ExpressionConfig {
        ExpressionConfig {
            attribute: attribute.to_string(),
            operation,
            value: value.map(str::to_string),
            value_type,
        }
    }

    fn rule(exprs: Vec<ExpressionConfig>, boolean_op: BooleanOp, score: i32) -> RuleConfig {
        RuleConfig {
            id: None,
            score: Some(ScoreValue(score)),
            score_attribute: None,
            boolean_op,
            role: None,
            expressions: exprs,
        }
    }

    #[test]
    fn test_typed_comparisons() {
        let node = create_test_node("n1", &[("ram", "16"), ("kernel", "5.10.2")]);

        // "16" < "4" as strings, but not as numbers
        assert!(evaluate_expression(&expr("ram", ExpressionOp::Lt, Some("4"), ValueType::String), &node));
        assert!(!evaluate_expression(&expr("ram", ExpressionOp::Lt, Some("4"), ValueType::Number), &node));
        assert!(evaluate_expression(&expr("kernel", ExpressionOp::Gte, Some("5.9"), ValueType::Version), &node));
        assert!(evaluate_expression(&expr("kernel", ExpressionOp::Eq, Some("5.10.2.0"), ValueType::Version), &node));
    }

    #[test]
    fn test_missing_attributes() {
        let node = create_test_node("n1", &[]);
        assert!(evaluate_expression(&expr("gpu", ExpressionOp::NotDefined, None, ValueType::String), &node));
        assert!(!evaluate_expression(&expr("gpu", ExpressionOp::Eq, Some("yes"), ValueType::String), &node));
        assert!(evaluate_expression(&expr("gpu", ExpressionOp::Ne, Some("yes"), ValueType::String), &node));
        assert!(evaluate_expression(&expr("#uname", ExpressionOp::Eq, Some("n1"), ValueType::String), &node));
    }

    #[test]
    fn test_rule_resolution() {
        let nodes = vec![
            create_test_node("n1", &[("rack", "1"), ("ssd", "yes")]),
            create_test_node("n2", &[("rack", "2")]),
            create_test_node("n3", &[("rack", "3"), ("ssd", "yes")]),
        ];
        let and = rule(
            vec![
                expr("rack", ExpressionOp::Gt, Some("1"), ValueType::Number),
                expr("ssd", ExpressionOp::Defined, None, ValueType::String),
            ],
            BooleanOp::And,
            100,
        );
        assert_eq!(resolve_rule(&and, &nodes), vec![(NodeId(2), 100)]);

        let mut or = and.clone();
        or.boolean_op = BooleanOp::Or;
        or.score = Some(ScoreValue(-INFINITY));
        assert_eq!(resolve_rule(&or, &nodes).len(), 3);
    }

    #[test]
    fn test_score_attribute() {
        let node = create_test_node("n1", &[("pingd", "300")]);
        let mut r = rule(vec![], BooleanOp::And, 0);
        r.score_attribute = Some("pingd".to_string());
        assert_eq!(rule_score(&r, &node), 300);

        r.score_attribute = Some("missing".to_string());
        assert_eq!(rule_score(&r, &node), 0);
    }
}
