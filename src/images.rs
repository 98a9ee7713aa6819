//! Agent image references.
//!
//! An image reference is `<registry>/<name>:<tag>`. Overrides in the
//! DatadogAgent may replace any part of the default reference; see
//! [`override_image`].

use std::fmt;

use semver::Version;

use crate::crd::AgentImageConfig;

pub const DEFAULT_REGISTRY: &str = "gcr.io/datadoghq";
pub const AGENT_IMAGE_NAME: &str = "agent";
pub const CLUSTER_AGENT_IMAGE_NAME: &str = "cluster-agent";
pub const AGENT_LATEST_VERSION: &str = "7.71.1";
pub const CLUSTER_AGENT_LATEST_VERSION: &str = "7.71.1";
pub const JMX_TAG_SUFFIX: &str = "-jmx";

/// A parsed image reference.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Image {
    pub registry: String,
    pub name: String,
    pub tag: String,
    pub jmx: bool,
}

impl Image {
    pub fn new(registry: &str, name: &str, tag: &str, jmx: bool) -> Self {
        Self {
            registry: registry.to_string(),
            name: name.to_string(),
            tag: tag.trim_end_matches(JMX_TAG_SUFFIX).to_string(),
            jmx: jmx || tag.ends_with(JMX_TAG_SUFFIX),
        }
    }

    /// Parse `[registry/]name[:tag]`. The tag defaults to `latest`.
    pub fn parse(reference: &str) -> Self {
        let (path, tag) = split_tag(reference);
        let (registry, name) = match path.rsplit_once('/') {
            Some((registry, name)) => (registry, name),
            None => ("", path),
        };
        Self::new(registry, name, tag.unwrap_or("latest"), false)
    }

    pub fn latest_agent(registry: &str) -> Self {
        Self::new(registry, AGENT_IMAGE_NAME, AGENT_LATEST_VERSION, false)
    }

    pub fn latest_cluster_agent(registry: &str) -> Self {
        Self::new(
            registry,
            CLUSTER_AGENT_IMAGE_NAME,
            CLUSTER_AGENT_LATEST_VERSION,
            false,
        )
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        write!(f, "{}:{}", self.name, self.tag)?;
        if self.jmx {
            f.write_str(JMX_TAG_SUFFIX)?;
        }
        Ok(())
    }
}

/// Split `path[:tag]`, ignoring a `:` that belongs to a registry port.
fn split_tag(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once(':') {
        Some((path, tag)) if !tag.contains('/') => (path, Some(tag)),
        _ => (reference, None),
    }
}

/// Whether an image name already carries a tag.
pub fn has_tag(name: &str) -> bool {
    split_tag(name).1.is_some()
}

/// Apply an image override to the current reference of a container.
///
/// A name with a tag is used verbatim. A name with a `/` replaces registry
/// and name, a bare name replaces only the name. An empty tag keeps the
/// current tag. `jmxEnabled` toggles the `-jmx` suffix.
pub fn override_image(current: &str, config: &AgentImageConfig) -> String {
    if has_tag(&config.name) {
        return config.name.clone();
    }

    let mut image = Image::parse(current);
    if let Some((registry, name)) = config.name.rsplit_once('/') {
        image.registry = registry.to_string();
        image.name = name.to_string();
    } else if !config.name.is_empty() {
        image.name = config.name.clone();
    }
    if !config.tag.is_empty() {
        image.tag = config.tag.trim_end_matches(JMX_TAG_SUFFIX).to_string();
    }
    image.jmx = config.jmx_enabled;
    image.to_string()
}

/// Agent version carried by an image tag, if it parses.
///
/// Suffixes such as `-jmx` or `-rc.1` are dropped and short tags like `7`
/// are expanded to `7.0.0`.
pub fn version_from_tag(tag: &str) -> Option<Version> {
    let version_part = tag.split('-').next().unwrap_or(tag);
    let normalized = match version_part.matches('.').count() {
        0 => format!("{version_part}.0.0"),
        1 => format!("{version_part}.0"),
        _ => version_part.to_string(),
    };
    Version::parse(&normalized).ok()
}

/// Whether the agent image of an override is at least `min`. Tags that do
/// not parse (`latest`, digests) count as recent.
pub fn is_at_least(config: &AgentImageConfig, min: &Version) -> bool {
    let tag = if has_tag(&config.name) {
        Image::parse(&config.name).tag
    } else {
        config.tag.clone()
    };
    if tag.is_empty() {
        return true;
    }
    version_from_tag(&tag).is_none_or(|v| v >= *min)
}

/// Rewrite the registry of an image reference.
pub fn with_registry(current: &str, registry: &str) -> String {
    let mut image = Image::parse(current);
    image.registry = registry.to_string();
    image.to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config(name: &str, tag: &str, jmx: bool) -> AgentImageConfig {
        AgentImageConfig {
            name: name.to_string(),
            tag: tag.to_string(),
            jmx_enabled: jmx,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_and_display() {
        let image = Image::parse("gcr.io/datadoghq/agent:7.50.0-jmx");
        assert_eq!(image.registry, "gcr.io/datadoghq");
        assert_eq!(image.name, "agent");
        assert_eq!(image.tag, "7.50.0");
        assert!(image.jmx);
        assert_eq!(image.to_string(), "gcr.io/datadoghq/agent:7.50.0-jmx");

        let local = Image::parse("localhost:5000/agent");
        assert_eq!(local.registry, "localhost:5000");
        assert_eq!(local.tag, "latest");
    }

    #[test]
    fn test_override_full_reference_used_verbatim() {
        assert_eq!(
            override_image(
                "gcr.io/datadoghq/agent:7.71.1",
                &config("docker.io/datadog/agent:7.50.0", "ignored", true)
            ),
            "docker.io/datadog/agent:7.50.0"
        );
    }

    #[test]
    fn test_override_name_and_tag() {
        let current = "gcr.io/datadoghq/agent:7.71.1";
        assert_eq!(
            override_image(current, &config("", "7.50.0", false)),
            "gcr.io/datadoghq/agent:7.50.0"
        );
        assert_eq!(
            override_image(current, &config("custom-agent", "", false)),
            "gcr.io/datadoghq/custom-agent:7.71.1"
        );
        assert_eq!(
            override_image(current, &config("public.ecr.aws/datadog/agent", "", false)),
            "public.ecr.aws/datadog/agent:7.71.1"
        );
    }

    #[test]
    fn test_override_jmx_suffix() {
        assert_eq!(
            override_image("gcr.io/datadoghq/agent:7.71.1", &config("", "", true)),
            "gcr.io/datadoghq/agent:7.71.1-jmx"
        );
        assert_eq!(
            override_image("gcr.io/datadoghq/agent:7.71.1-jmx", &config("", "", false)),
            "gcr.io/datadoghq/agent:7.71.1"
        );
    }

    #[test]
    fn test_version_from_tag() {
        assert_eq!(version_from_tag("7.50.3-jmx"), Some(Version::new(7, 50, 3)));
        assert_eq!(version_from_tag("7"), Some(Version::new(7, 0, 0)));
        assert_eq!(version_from_tag("latest"), None);
    }

    #[test]
    fn test_is_at_least() {
        let min = Version::new(7, 51, 0);
        assert!(!is_at_least(&config("", "7.50.0", false), &min));
        assert!(is_at_least(&config("", "7.51.0", false), &min));
        assert!(is_at_least(&config("", "", false), &min));
        assert!(!is_at_least(&config("gcr.io/datadoghq/agent:7.49.1", "", false), &min));
        assert!(is_at_least(&config("", "latest", false), &min));
    }

    #[test]
    fn test_with_registry() {
        assert_eq!(
            with_registry("gcr.io/datadoghq/cluster-agent:7.71.1", "public.ecr.aws/datadog"),
            "public.ecr.aws/datadog/cluster-agent:7.71.1"
        );
    }
}
