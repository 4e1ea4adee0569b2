//! Key-space layout inside the coordination substrate
//!
//! ```text
//! /<ns>/test/<leaseHex>                 test record, bound to its lease
//! /<ns>/server/<workerId>               worker heartbeat, swept explicitly
//! /<ns>/results/<leaseHex>/<workerId>   results, bound to the test's lease
//! ```

/// Namespaced key builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    root: String,
}

impl KeySpace {
    /// Key space rooted at `/<namespace>/`
    pub fn new(namespace: &str) -> Self {
        Self {
            root: format!("/{}/", namespace.trim_matches('/')),
        }
    }

    /// Prefix covering every record of the namespace
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefix of all test records
    pub fn tests(&self) -> String {
        format!("{}test/", self.root)
    }

    /// Key of one test record
    pub fn test(&self, lease_hex: &str) -> String {
        format!("{}test/{}", self.root, lease_hex)
    }

    /// Prefix of all worker registrations
    pub fn servers(&self) -> String {
        format!("{}server/", self.root)
    }

    /// Key of one worker registration
    pub fn server(&self, server_id: &str) -> String {
        format!("{}server/{}", self.root, server_id)
    }

    /// Prefix of all result records
    pub fn all_results(&self) -> String {
        format!("{}results/", self.root)
    }

    /// Prefix of the result records of one test
    pub fn results(&self, lease_hex: &str) -> String {
        format!("{}results/{}/", self.root, lease_hex)
    }

    /// Key of the results one worker published for one test
    pub fn result(&self, lease_hex: &str, server_id: &str) -> String {
        format!("{}results/{}/{}", self.root, lease_hex, server_id)
    }

    /// Classify a key of this namespace
    pub fn classify<'a>(&self, key: &'a str) -> KeyKind<'a> {
        let Some(rest) = key.strip_prefix(self.root.as_str()) else {
            return KeyKind::Other;
        };
        if let Some(lease) = rest.strip_prefix("test/") {
            KeyKind::Test(lease)
        } else if let Some(id) = rest.strip_prefix("server/") {
            KeyKind::Server(id)
        } else if let Some(scoped) = rest.strip_prefix("results/") {
            match scoped.split_once('/') {
                Some((lease, server)) => KeyKind::Results { lease, server },
                None => KeyKind::Other,
            }
        } else {
            KeyKind::Other
        }
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_NAMESPACE)
    }
}

/// Record category of a substrate key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind<'a> {
    /// Test record, with its lease hex
    Test(&'a str),
    /// Worker registration, with the worker id
    Server(&'a str),
    /// Result record
    Results {
        /// Test lease hex
        lease: &'a str,
        /// Reporting worker id
        server: &'a str,
    },
    /// Anything else
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new("lt");
        assert_eq!(keys.root(), "/lt/");
        assert_eq!(keys.tests(), "/lt/test/");
        assert_eq!(keys.test("1f"), "/lt/test/1f");
        assert_eq!(keys.servers(), "/lt/server/");
        assert_eq!(keys.server("urn:uuid:a"), "/lt/server/urn:uuid:a");
        assert_eq!(keys.results("1f"), "/lt/results/1f/");
        assert_eq!(keys.result("1f", "urn:uuid:a"), "/lt/results/1f/urn:uuid:a");
    }

    #[test]
    fn test_namespace_slashes_trimmed() {
        assert_eq!(KeySpace::new("/lt/").tests(), "/lt/test/");
    }

    #[test]
    fn test_classify() {
        let keys = KeySpace::new("lt");
        assert_eq!(keys.classify("/lt/test/1f"), KeyKind::Test("1f"));
        assert_eq!(keys.classify("/lt/server/urn:uuid:a"), KeyKind::Server("urn:uuid:a"));
        assert_eq!(
            keys.classify("/lt/results/1f/urn:uuid:a"),
            KeyKind::Results {
                lease: "1f",
                server: "urn:uuid:a"
            }
        );
        assert_eq!(keys.classify("/lt/results/1f"), KeyKind::Other);
        assert_eq!(keys.classify("/other/test/1f"), KeyKind::Other);
    }
}
