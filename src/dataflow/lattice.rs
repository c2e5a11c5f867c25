/// Four-point nullness lattice: `Bottom ⊑ NonNull, Null ⊑ Top`.
///
/// `Null` means the value is definitely null on every path that reaches the point.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub(crate) enum Nullness {
    /// Unreached or not yet defined.
    #[default]
    Bottom,
    NonNull,
    Null,
    /// Null on some paths and non-null on others, or simply unknown.
    Top,
}

impl Nullness {
    pub(crate) fn join(self, other: Self) -> Self {
        match (self, other) {
            (Nullness::Bottom, value) | (value, Nullness::Bottom) => value,
            (left, right) if left == right => left,
            _ => Nullness::Top,
        }
    }

    /// Partial order of the lattice.
    pub(crate) fn leq(self, other: Self) -> bool {
        self.join(other) == other
    }
}

/// Per-value fact: the lattice value plus whether some source of the value is
/// explicitly `@Nullable` or a `null` literal.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub(crate) struct Fact {
    pub(crate) nullness: Nullness,
    pub(crate) nullable_evidence: bool,
}

impl Fact {
    pub(crate) const BOTTOM: Fact = Fact {
        nullness: Nullness::Bottom,
        nullable_evidence: false,
    };
    pub(crate) const NON_NULL: Fact = Fact {
        nullness: Nullness::NonNull,
        nullable_evidence: false,
    };
    pub(crate) const NULL: Fact = Fact {
        nullness: Nullness::Null,
        nullable_evidence: true,
    };
    pub(crate) const UNKNOWN: Fact = Fact {
        nullness: Nullness::Top,
        nullable_evidence: false,
    };
    pub(crate) const NULLABLE: Fact = Fact {
        nullness: Nullness::Top,
        nullable_evidence: true,
    };

    pub(crate) fn join(self, other: Self) -> Self {
        Self {
            nullness: self.nullness.join(other.nullness),
            nullable_evidence: self.nullable_evidence || other.nullable_evidence,
        }
    }

    pub(crate) fn leq(self, other: Self) -> bool {
        self.join(other) == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Nullness; 4] = [
        Nullness::Bottom,
        Nullness::NonNull,
        Nullness::Null,
        Nullness::Top,
    ];

    fn all_facts() -> Vec<Fact> {
        ALL.iter()
            .flat_map(|nullness| {
                [false, true].map(|nullable_evidence| Fact {
                    nullness: *nullness,
                    nullable_evidence,
                })
            })
            .collect()
    }

    #[test]
    fn join_is_idempotent_commutative_and_associative() {
        let facts = all_facts();
        for a in &facts {
            assert_eq!(*a, a.join(*a));
            for b in &facts {
                assert_eq!(a.join(*b), b.join(*a));
                for c in &facts {
                    assert_eq!(a.join(*b).join(*c), a.join(b.join(*c)));
                }
            }
        }
    }

    #[test]
    fn bottom_is_identity_and_top_absorbs() {
        for value in ALL {
            assert_eq!(value, Nullness::Bottom.join(value));
            assert_eq!(Nullness::Top, Nullness::Top.join(value));
        }
        assert_eq!(Nullness::Top, Nullness::NonNull.join(Nullness::Null));
    }

    #[test]
    fn order_is_consistent_with_join() {
        assert!(Nullness::Bottom.leq(Nullness::NonNull));
        assert!(Nullness::Null.leq(Nullness::Top));
        assert!(!Nullness::Null.leq(Nullness::NonNull));
        assert!(Fact::UNKNOWN.leq(Fact::NULLABLE));
        assert!(!Fact::NULLABLE.leq(Fact::UNKNOWN));
    }

    #[test]
    fn evidence_survives_merge() {
        let merged = Fact::NULL.join(Fact::NON_NULL);

        assert_eq!(Nullness::Top, merged.nullness);
        assert!(merged.nullable_evidence);
    }
}
