//! Stable logical naming for graph resources.
//!
//! A logical id is the human-readable path (alphanumerics only, consecutive
//! duplicate components collapsed) followed by the first 8 hex digits of the
//! BLAKE3 digest of the full path. Same path, same id, on every run.

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple components.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

const DIGEST_LEN: usize = 8;

/// Naming scheme for one stack: every logical id is rooted at `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    prefix: String,
}

impl Naming {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: sanitize(prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Construct path for a resource, e.g. `StrapiService/Service/SecurityGroup`.
    pub fn path(&self, path: &[&str]) -> String {
        self.components(path).join("/")
    }

    /// Logical id for a resource path, e.g. `StrapiServiceSecurityGroup6B02743C`.
    pub fn logical_id(&self, path: &[&str]) -> String {
        let mut human = self.prefix.clone();
        let mut last: Option<String> = None;
        for part in path.iter().map(|p| sanitize(p)).filter(|p| !p.is_empty()) {
            if last.as_deref() == Some(part.as_str()) {
                continue;
            }
            human.push_str(&part);
            last = Some(part);
        }
        let digest = blake3::hash(self.path(path).as_bytes()).to_hex();
        format!("{}{}", human, digest[..DIGEST_LEN].to_ascii_uppercase())
    }

    fn components(&self, path: &[&str]) -> Vec<String> {
        let mut out = Vec::with_capacity(path.len());
        for (i, part) in path.iter().enumerate() {
            let part = sanitize(part);
            if i == 0 {
                out.push(format!("{}{}", self.prefix, part));
            } else if !part.is_empty() {
                out.push(part);
            }
        }
        out
    }
}

fn sanitize(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_hash_string() {
        let h1 = hash_string("hello");
        let h2 = hash_string("hello");
        let h3 = hash_string("world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64);
    }

    #[test]
    fn test_naming_composite_hash_order_matters() {
        let h = composite_hash(&["a", "b"]);
        let h2 = composite_hash(&["b", "a"]);
        assert_ne!(h, h2);
    }

    #[test]
    fn test_naming_logical_id_shape() {
        let naming = Naming::new("Strapi");
        let id = naming.logical_id(&["Service", "SecurityGroup"]);
        assert!(id.starts_with("StrapiServiceSecurityGroup"));
        assert_eq!(id.len(), "StrapiServiceSecurityGroup".len() + 8);
        assert!(id[id.len() - 8..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_naming_logical_id_stable() {
        let a = Naming::new("Strapi").logical_id(&["FileSystem"]);
        let b = Naming::new("Strapi").logical_id(&["FileSystem"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_naming_collapses_duplicate_components() {
        let naming = Naming::new("");
        let id = naming.logical_id(&["Service", "Service"]);
        assert!(id.starts_with("Service"));
        assert!(!id.starts_with("ServiceService"));
        // the digest still covers the full path
        assert_ne!(id, naming.logical_id(&["Service"]));

        let prefixed = Naming::new("Strapi").logical_id(&["Service", "Service", "SecurityGroup"]);
        assert!(prefixed.starts_with("StrapiServiceSecurityGroup"));
    }

    #[test]
    fn test_naming_sanitizes() {
        let naming = Naming::new("my-app");
        assert_eq!(naming.prefix(), "myapp");
        assert_eq!(naming.path(&["Db", "Secret"]), "myappDb/Secret");
    }
}
