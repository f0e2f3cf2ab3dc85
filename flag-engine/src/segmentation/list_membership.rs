use std::collections::{HashMap, HashSet};

/// Answers `inlist(listId)` operands. Implementations must be cheap and
/// non-blocking: any remote lookup happens before evaluation.
pub trait ListMembership: Send + Sync {
    fn check_in_list(&self, attribute_value: &str, list_id: &str) -> bool;
}

/// Treats every list as empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoListMembership;

impl ListMembership for NoListMembership {
    fn check_in_list(&self, attribute_value: &str, list_id: &str) -> bool {
        tracing::debug!(list_id, attribute_value, "no list membership source configured");
        false
    }
}

/// Lists held in memory, keyed by list id.
#[derive(Debug, Clone, Default)]
pub struct StaticListMembership {
    lists: HashMap<String, HashSet<String>>,
}

impl StaticListMembership {
    pub fn with_list<I, S>(mut self, list_id: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lists
            .entry(list_id.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }
}

impl ListMembership for StaticListMembership {
    fn check_in_list(&self, attribute_value: &str, list_id: &str) -> bool {
        self.lists
            .get(list_id)
            .is_some_and(|values| values.contains(attribute_value))
    }
}
