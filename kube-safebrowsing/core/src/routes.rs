use ahash::AHashSet as HashSet;

/// The domains routed by a single Ingress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingRule {
    pub namespace: String,
    pub name: String,

    /// Canonical domains, deduplicated in the order their hosts were declared.
    pub domains: Vec<String>,
}

/// The deduplicated, order-stable set of domains checked in a single lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainSet(Vec<String>);

// === impl RoutingRule ===

impl RoutingRule {
    pub fn new(
        namespace: impl ToString,
        name: impl ToString,
        domains: impl IntoIterator<Item = impl ToString>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            domains: dedup(domains.into_iter().map(|d| d.to_string())),
        }
    }
}

// === impl DomainSet ===

impl DomainSet {
    /// Builds the set from every rule's domains followed by `additional`
    /// domains. Blank entries are skipped.
    pub fn from_rules<'a>(
        rules: impl IntoIterator<Item = &'a RoutingRule>,
        additional: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        let domains = rules
            .into_iter()
            .flat_map(|rule| rule.domains.iter())
            .chain(additional)
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .map(ToString::to_string);
        Self(dedup(domains))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.0.iter().any(|d| d == domain)
    }
}

impl<S: ToString> FromIterator<S> for DomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(dedup(iter.into_iter().map(|d| d.to_string())))
    }
}

impl IntoIterator for DomainSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}
