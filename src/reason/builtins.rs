//! Comparison builtins from the `log:` and `math:` namespaces.

use std::cmp::Ordering;

use chrono::DateTime;
use oxigraph::model::Term;

use crate::error::ReasonError;
use crate::vocab::{LOG_NS, MATH_NS};

use super::ReasonResult;

/// IRI of `log:notIncludes`, handled by the rule compiler rather than here.
pub const LOG_NOT_INCLUDES: &str = "http://www.w3.org/2000/10/swap/log#notIncludes";

/// A binary comparison builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    EqualTo,
    NotEqualTo,
    LessThan,
    GreaterThan,
    NotLessThan,
    NotGreaterThan,
}

impl Builtin {
    /// Recognize a builtin predicate IRI.
    pub fn from_iri(iri: &str) -> Option<Self> {
        if let Some(local) = iri.strip_prefix(LOG_NS) {
            return match local {
                "equalTo" => Some(Self::EqualTo),
                "notEqualTo" => Some(Self::NotEqualTo),
                _ => None,
            };
        }
        match iri.strip_prefix(MATH_NS)? {
            "lessThan" => Some(Self::LessThan),
            "greaterThan" => Some(Self::GreaterThan),
            "notLessThan" => Some(Self::NotLessThan),
            "notGreaterThan" => Some(Self::NotGreaterThan),
            "equalTo" => Some(Self::EqualTo),
            "notEqualTo" => Some(Self::NotEqualTo),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::EqualTo => "equalTo",
            Self::NotEqualTo => "notEqualTo",
            Self::LessThan => "math:lessThan",
            Self::GreaterThan => "math:greaterThan",
            Self::NotLessThan => "math:notLessThan",
            Self::NotGreaterThan => "math:notGreaterThan",
        }
    }

    /// Evaluate the builtin on two bound terms.
    pub fn holds(self, left: &Term, right: &Term) -> ReasonResult<bool> {
        let ordering = || {
            compare(left, right).ok_or_else(|| ReasonError::Builtin {
                builtin: self.name().to_string(),
                message: format!("cannot order {left} and {right}"),
            })
        };
        match self {
            Self::EqualTo => Ok(left == right || compare(left, right) == Some(Ordering::Equal)),
            Self::NotEqualTo => {
                Ok(left != right && compare(left, right) != Some(Ordering::Equal))
            }
            Self::LessThan => Ok(ordering()? == Ordering::Less),
            Self::GreaterThan => Ok(ordering()? == Ordering::Greater),
            Self::NotLessThan => Ok(ordering()? != Ordering::Less),
            Self::NotGreaterThan => Ok(ordering()? != Ordering::Greater),
        }
    }
}

/// Order two literals numerically, then as date-times, then lexically.
/// Non-literals are unordered.
fn compare(left: &Term, right: &Term) -> Option<Ordering> {
    let (Term::Literal(a), Term::Literal(b)) = (left, right) else {
        return None;
    };
    let (a, b) = (a.value(), b.value());

    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return x.partial_cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        return Some(x.cmp(&y));
    }
    Some(a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{Literal, NamedNode};
    use oxigraph::model::vocab::xsd;

    fn date(value: &str) -> Term {
        Literal::new_typed_literal(value, xsd::DATE_TIME).into()
    }

    fn int(value: i64) -> Term {
        Literal::from(value).into()
    }

    #[test]
    fn recognizes_builtin_iris() {
        assert_eq!(
            Builtin::from_iri("http://www.w3.org/2000/10/swap/math#lessThan"),
            Some(Builtin::LessThan)
        );
        assert_eq!(
            Builtin::from_iri("http://www.w3.org/2000/10/swap/log#notEqualTo"),
            Some(Builtin::NotEqualTo)
        );
        assert_eq!(Builtin::from_iri("http://example.org/ns#data"), None);
        assert_eq!(Builtin::from_iri(LOG_NOT_INCLUDES), None);
    }

    #[test]
    fn numeric_comparison_is_not_lexical() {
        assert!(Builtin::LessThan.holds(&int(9), &int(10)).unwrap());
        assert!(Builtin::NotLessThan.holds(&int(10), &int(10)).unwrap());
    }

    #[test]
    fn date_times_compare_across_offsets() {
        let early = date("2024-01-01T10:00:00+02:00");
        let late = date("2024-01-01T09:00:00Z");
        assert!(Builtin::LessThan.holds(&early, &late).unwrap());
        assert!(Builtin::GreaterThan.holds(&late, &early).unwrap());
    }

    #[test]
    fn ordering_iris_is_an_error() {
        let iri: Term = NamedNode::new("http://x/a").unwrap().into();
        let err = Builtin::LessThan.holds(&iri, &int(1)).unwrap_err();
        assert!(matches!(err, ReasonError::Builtin { .. }));
    }

    #[test]
    fn equality_on_terms() {
        let a: Term = NamedNode::new("http://x/a").unwrap().into();
        let b: Term = NamedNode::new("http://x/b").unwrap().into();
        assert!(Builtin::EqualTo.holds(&a, &a).unwrap());
        assert!(Builtin::NotEqualTo.holds(&a, &b).unwrap());
    }
}
