//! Post-sort rewrite rules.
//!
//! Each rule is a pure `Vec<String> -> Vec<String>` rewrite applied after the
//! dependency sort. The table is fixed; callers cannot add rules.

/// A single ordering rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteRule {
    /// `drop` is redundant when `keep` is selected, unless `drop` was
    /// requested explicitly. `keep` moves to the earlier of the two positions
    /// so stages that needed `drop` still see its replacement first.
    Subsume {
        keep: &'static str,
        drop: &'static str,
    },
    /// When both are present, `then` runs immediately after `first`.
    After {
        first: &'static str,
        then: &'static str,
    },
}

pub const REWRITE_RULES: &[RewriteRule] = &[
    RewriteRule::Subsume {
        keep: "parse",
        drop: "depparse",
    },
    RewriteRule::After {
        first: "ner",
        then: "regexner",
    },
];

impl RewriteRule {
    pub fn apply(&self, mut order: Vec<String>, requested: &[String]) -> Vec<String> {
        match *self {
            RewriteRule::Subsume { keep, drop } => {
                if requested.iter().any(|r| r == drop) {
                    return order;
                }
                let (Some(keep_at), Some(drop_at)) = (position(&order, keep), position(&order, drop))
                else {
                    return order;
                };
                if keep_at < drop_at {
                    order.remove(drop_at);
                } else {
                    let kept = order.remove(keep_at);
                    order[drop_at] = kept;
                }
                order
            }
            RewriteRule::After { first, then } => {
                let (Some(_), Some(then_at)) = (position(&order, first), position(&order, then))
                else {
                    return order;
                };
                let moved = order.remove(then_at);
                // `first` may have shifted left by one after the removal.
                let first_at = position(&order, first).unwrap_or(order.len().saturating_sub(1));
                order.insert(first_at + 1, moved);
                order
            }
        }
    }

    /// The stage that stands in for `name` once this rule has applied, if any.
    pub fn substitute_for(&self, name: &str) -> Option<&'static str> {
        match *self {
            RewriteRule::Subsume { keep, drop } if drop == name => Some(keep),
            _ => None,
        }
    }
}

fn position(order: &[String], name: &str) -> Option<usize> {
    order.iter().position(|n| n == name)
}

/// Apply every rule in table order.
pub fn apply_all(order: Vec<String>, requested: &[String]) -> Vec<String> {
    REWRITE_RULES
        .iter()
        .fold(order, |acc, rule| rule.apply(acc, requested))
}
