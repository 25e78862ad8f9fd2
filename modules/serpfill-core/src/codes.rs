//! Static lookups from system tags and type tags to integer codes.
//!
//! Every system has its own type-tag table: the same tag can mean different
//! query types depending on which system produced the record.

use std::collections::HashMap;

use crate::error::CodeError;

/// Platforms queried by the scrapers, in code order.
const PLATFORMS: [&str; 9] = [
    "facebook",
    "instagram",
    "tiktok",
    "reddit",
    "linkedin",
    "pinterest",
    "telegram",
    "tumblr",
    "patreon",
];

/// One data-source system and its type-tag table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SystemCodes {
    id: i32,
    query_types: HashMap<String, i32>,
}

/// System-tag → system table, built once at startup and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeTables {
    systems: HashMap<String, SystemCodes>,
}

impl CodeTables {
    /// Empty tables; every lookup fails until systems are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// The tables used by the production scrapers: system `b` takes bare
    /// platform names, system `a` takes `inurl:<platform>.com` queries.
    pub fn builtin() -> Self {
        let plain = PLATFORMS
            .iter()
            .enumerate()
            .map(|(code, name)| (name.to_string(), code as i32));
        let inurl = PLATFORMS
            .iter()
            .enumerate()
            .map(|(code, name)| (format!("inurl:{name}.com"), code as i32));

        Self::new().with_system("b", 0, plain).with_system("a", 1, inurl)
    }

    /// Add (or replace) a system and its type-tag table.
    pub fn with_system<K: Into<String>>(
        mut self,
        tag: impl Into<String>,
        id: i32,
        query_types: impl IntoIterator<Item = (K, i32)>,
    ) -> Self {
        let query_types = query_types
            .into_iter()
            .map(|(name, code)| (name.into(), code))
            .collect();
        self.systems.insert(tag.into(), SystemCodes { id, query_types });
        self
    }

    /// Map a system tag and a type tag to `(system_id, query_type_id)`.
    pub fn resolve(&self, system_tag: &str, type_tag: &str) -> Result<(i32, i32), CodeError> {
        let system = self
            .systems
            .get(system_tag)
            .ok_or_else(|| CodeError::UnknownSystem(system_tag.to_string()))?;

        let query_type = system.query_types.get(type_tag).ok_or_else(|| {
            CodeError::UnknownQueryType {
                system: system_tag.to_string(),
                tag: type_tag.to_string(),
            }
        })?;

        Ok((system.id, *query_type))
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_are_keyed_per_system() {
        let codes = CodeTables::builtin();
        assert_eq!(codes.resolve("b", "facebook"), Ok((0, 0)));
        assert_eq!(codes.resolve("b", "patreon"), Ok((0, 8)));
        assert_eq!(codes.resolve("a", "inurl:reddit.com"), Ok((1, 3)));

        // Type tags are not shared between systems.
        assert_eq!(
            codes.resolve("a", "reddit"),
            Err(CodeError::UnknownQueryType {
                system: "a".into(),
                tag: "reddit".into()
            })
        );
    }

    #[test]
    fn unknown_system_tag() {
        let codes = CodeTables::builtin();
        assert_eq!(
            codes.resolve("z", "facebook"),
            Err(CodeError::UnknownSystem("z".into()))
        );
    }

    #[test]
    fn custom_tables_replace_systems() {
        let codes = CodeTables::new()
            .with_system("b", 1, [("b", 0), ("x", 7)])
            .with_system("b", 2, [("b", 5)]);
        assert_eq!(codes.resolve("b", "b"), Ok((2, 5)));
        assert!(codes.resolve("b", "x").is_err());
        assert!(CodeTables::new().is_empty());
    }
}
