use std::collections::HashSet;

/// Entry that admits every metric name.
pub const WILDCARD: &str = "*";

/// Set of metric names the output writes.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    names: HashSet<String>,
    admit_all: bool,
}

impl AllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        let admit_all = names.contains(WILDCARD);
        Self { names, admit_all }
    }

    pub fn admit(&self, name: &str) -> bool {
        self.admit_all || self.names.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_listed_names_only() {
        let list = AllowList::new(["cpu", "mem"]);
        assert!(list.admit("cpu"));
        assert!(list.admit("mem"));
        assert!(!list.admit("disk"));
    }

    #[test]
    fn wildcard_admits_everything() {
        let list = AllowList::new(["cpu", "*"]);
        assert!(list.admit("cpu"));
        assert!(list.admit("disk"));
        assert!(list.admit(""));
    }

    #[test]
    fn empty_list_admits_nothing() {
        let list = AllowList::new(Vec::<String>::new());
        assert!(!list.admit("cpu"));
    }
}
