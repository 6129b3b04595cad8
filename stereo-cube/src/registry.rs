//! Static registries of winsys backends and renderers

/// A single-letter option taking one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub short: char,
    /// Argument id in the combined grammar
    pub id: &'static str,
    pub value_name: &'static str,
    pub help: &'static str,
}

/// A registry entry: a name plus the options it understands
pub trait Descriptor: 'static {
    fn name(&self) -> &'static str;
    fn options(&self) -> &'static [OptionSpec];
}

/// Closed, declaration-ordered list of descriptors
pub struct Registry<D: 'static> {
    entries: &'static [D],
}

impl<D: Descriptor> Registry<D> {
    pub const fn new(entries: &'static [D]) -> Self {
        Self { entries }
    }

    /// Exact, case-sensitive lookup
    pub fn select(&self, name: &str) -> Option<&'static D> {
        self.entries.iter().find(|d| d.name() == name)
    }

    /// Names in declaration order
    pub fn list(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(Descriptor::name)
    }

    /// Entry used when nothing is selected
    pub fn first(&self) -> Option<&'static D> {
        self.entries.first()
    }

    pub fn entries(&self) -> &'static [D] {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry(&'static str, &'static [OptionSpec]);

    impl Descriptor for Entry {
        fn name(&self) -> &'static str {
            self.0
        }
        fn options(&self) -> &'static [OptionSpec] {
            self.1
        }
    }

    static ENTRIES: [Entry; 3] = [Entry("gears", &[]), Entry("image", &[]), Entry("depth", &[])];
    static REGISTRY: Registry<Entry> = Registry::new(&ENTRIES);

    #[test]
    fn test_select_exact_name() {
        for name in ["gears", "image", "depth"] {
            assert_eq!(REGISTRY.select(name).map(|e| e.0), Some(name));
        }
    }

    #[test]
    fn test_select_rejects_near_misses() {
        assert!(REGISTRY.select("Gears").is_none());
        assert!(REGISTRY.select("gear").is_none());
        assert!(REGISTRY.select("gears ").is_none());
        assert!(REGISTRY.select("").is_none());
        assert!(REGISTRY.select("does-not-exist").is_none());
    }

    #[test]
    fn test_list_in_declaration_order() {
        assert_eq!(REGISTRY.list().collect::<Vec<_>>(), ["gears", "image", "depth"]);
        assert_eq!(REGISTRY.first().map(|e| e.0), Some("gears"));
    }

    #[test]
    fn test_builtin_registries() {
        assert_eq!(crate::winsys::WINSYSES.list().collect::<Vec<_>>(), ["gbm", "wayland"]);
        assert_eq!(
            crate::renderer::RENDERERS.list().collect::<Vec<_>>(),
            ["gears", "image", "depth"]
        );
    }
}
