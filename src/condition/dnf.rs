use crate::ast::{BinaryOp, Expr};

/// A conjunction of predicate atoms (anything that is not AND/OR).
pub(crate) type Conjunction<'a> = Vec<&'a Expr>;

/// Disjunctive normal form of a predicate.
///
/// Returns `None` when the expansion would exceed `cap` conjunctions.
pub(crate) fn to_dnf(expr: &Expr, cap: usize) -> Option<Vec<Conjunction<'_>>> {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::Or,
            right,
        } => {
            let mut branches = to_dnf(left, cap)?;
            let rest = to_dnf(right, cap)?;
            if branches.len() + rest.len() > cap {
                return None;
            }
            branches.extend(rest);
            Some(branches)
        }
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            let lhs = to_dnf(left, cap)?;
            let rhs = to_dnf(right, cap)?;
            if lhs.len().checked_mul(rhs.len())? > cap {
                return None;
            }
            let mut branches = Vec::with_capacity(lhs.len() * rhs.len());
            for l in &lhs {
                for r in &rhs {
                    let mut conj = l.clone();
                    conj.extend(r.iter().copied());
                    branches.push(conj);
                }
            }
            Some(branches)
        }
        atom => Some(vec![vec![atom]]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(col: &str, v: i64) -> Expr {
        Expr::col(col).equals(Expr::lit(v))
    }

    #[test]
    fn test_distributes_and_over_or() {
        // (a=1 OR a=2) AND (b=1 OR b=2)
        let e = eq("a", 1).or(eq("a", 2)).and(eq("b", 1).or(eq("b", 2)));
        let dnf = to_dnf(&e, 64).unwrap();
        assert_eq!(dnf.len(), 4);
        assert!(dnf.iter().all(|c| c.len() == 2));
        assert_eq!(dnf[1][0].to_string(), "a = 1");
        assert_eq!(dnf[1][1].to_string(), "b = 2");
    }

    #[test]
    fn test_not_is_an_atom() {
        let e = Expr::Not(Box::new(eq("a", 1).or(eq("a", 2))));
        assert_eq!(to_dnf(&e, 64).unwrap().len(), 1);
    }

    #[test]
    fn test_cap_overflow() {
        let mut e = eq("a", 0).or(eq("a", 1));
        for i in 0..6 {
            e = e.and(eq("b", i).or(eq("c", i)));
        }
        // 2^7 = 128 branches
        assert!(to_dnf(&e, 64).is_none());
        assert_eq!(to_dnf(&e, 128).map(|d| d.len()), Some(128));
    }
}
