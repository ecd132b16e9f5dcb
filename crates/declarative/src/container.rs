//! Containers: resources that own a list of member ids
//!
//! Selection of the target container, planning which other containers must
//! release members, and checking a membership write against its echo.

/// Read-only view of a container and its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerView<Id, M> {
    pub id: Id,
    pub name: String,
    pub kind: String,
    pub members: Vec<M>,
}

/// Predicate for picking the target container
#[derive(Debug, Clone, Default)]
pub struct ContainerSelector {
    kind: String,
    exclude_patterns: Vec<String>,
    preferred_name: Option<String>,
}

impl ContainerSelector {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Skip containers whose name contains any of `patterns` (case-insensitive).
    pub fn excluding<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns
            .into_iter()
            .map(|p| p.into().to_lowercase())
            .collect();
        self
    }

    /// Prefer the container with exactly this name.
    pub fn preferring(mut self, name: impl Into<String>) -> Self {
        self.preferred_name = Some(name.into());
        self
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.exclude_patterns.iter().any(|p| name.contains(p))
    }

    pub fn matches<Id, M>(&self, view: &ContainerView<Id, M>) -> bool {
        view.kind.eq_ignore_ascii_case(&self.kind) && !self.is_excluded(&view.name)
    }

    /// Pick the target: an exact name match if one qualifies, else the first
    /// qualifying container. `None` means one must be created.
    pub fn select<'a, Id, M>(
        &self,
        views: &'a [ContainerView<Id, M>],
    ) -> Option<&'a ContainerView<Id, M>> {
        let mut candidates = views.iter().filter(|v| self.matches(v));
        match &self.preferred_name {
            Some(name) => {
                let candidates: Vec<_> = candidates.collect();
                candidates
                    .iter()
                    .find(|v| &v.name == name)
                    .or_else(|| candidates.first())
                    .copied()
            }
            None => candidates.next(),
        }
    }
}

/// A container that must release its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detachment<Id, M> {
    pub container_id: Id,
    pub container_name: String,
    /// Members it holds that are about to be assigned to the target
    pub conflicting: Vec<M>,
}

/// Plan detachments: every container other than `target` holding any of
/// `owned` is to be emptied. The target is never part of the plan.
pub fn plan_detach<Id, M>(
    views: &[ContainerView<Id, M>],
    target: &Id,
    owned: &[M],
) -> Vec<Detachment<Id, M>>
where
    Id: Clone + PartialEq,
    M: Clone + PartialEq,
{
    views
        .iter()
        .filter(|v| &v.id != target)
        .filter_map(|v| {
            let conflicting: Vec<M> = v
                .members
                .iter()
                .filter(|m| owned.contains(m))
                .cloned()
                .collect();
            (!conflicting.is_empty()).then(|| Detachment {
                container_id: v.id.clone(),
                container_name: v.name.clone(),
                conflicting,
            })
        })
        .collect()
}

/// Comparison of an intended member list with what the server echoed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipCheck<M> {
    /// Same members, same order
    Exact,
    /// Same members, different order
    Reordered,
    /// Members differ
    Mismatch { missing: Vec<M>, unexpected: Vec<M> },
}

impl<M: Clone + Ord> MembershipCheck<M> {
    pub fn compare(intended: &[M], echoed: &[M]) -> Self {
        if intended == echoed {
            return Self::Exact;
        }

        let mut want = intended.to_vec();
        let mut got = echoed.to_vec();
        want.sort();
        want.dedup();
        got.sort();
        got.dedup();

        if want == got {
            return Self::Reordered;
        }

        Self::Mismatch {
            missing: want.iter().filter(|m| !got.contains(m)).cloned().collect(),
            unexpected: got.iter().filter(|m| !want.contains(m)).cloned().collect(),
        }
    }
}
