//! Which manifest entries apply to the running platform.
//!
//! Applicability is static data published in the manifest (`only` tags); the engine
//! only asks an injected [`PlatformFilter`] whether a tag set matches.

/// Capability check for manifest platform tags.
pub trait PlatformFilter: Send + Sync {
    fn applies(&self, tags: &[String]) -> bool;
}

/// Matches entries carrying at least one of the given tags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformTags {
    tags: Vec<String>,
}

impl PlatformTags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { tags: tags.into_iter().map(Into::into).collect() }
    }

    /// Tags the upstream mirror uses for the OS this binary was built for.
    pub fn current() -> Self {
        Self::new(tags_for_os(std::env::consts::OS).iter().copied())
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl PlatformFilter for PlatformTags {
    fn applies(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.iter().any(|mine| mine == t))
    }
}

/// Accepts every entry regardless of tags.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyPlatform;

impl PlatformFilter for AnyPlatform {
    fn applies(&self, _tags: &[String]) -> bool {
        true
    }
}

pub fn tags_for_os(os: &str) -> &'static [&'static str] {
    match os {
        "linux" => &["linux", "linux2"],
        "macos" => &["darwin"],
        "windows" => &["win32", "win64"],
        _ => &[],
    }
}
