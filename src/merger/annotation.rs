//! Pod template annotation manager.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::PodTemplateManagers;

pub struct AnnotationManager<'a> {
    pub(crate) managers: &'a mut PodTemplateManagers,
}

impl AnnotationManager<'_> {
    /// Set an annotation on the pod template. The last writer wins.
    pub fn add_annotation(&mut self, key: &str, value: &str) {
        let meta = self
            .managers
            .template
            .metadata
            .get_or_insert_with(ObjectMeta::default);
        meta.annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.managers
            .template
            .metadata
            .as_ref()?
            .annotations
            .as_ref()?
            .get(key)
            .map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodTemplateSpec;

    #[test]
    fn test_last_writer_wins() {
        let mut managers = PodTemplateManagers::new(PodTemplateSpec::default());
        managers.annotation().add_annotation("checksum/apm-custom-config", "a");
        managers.annotation().add_annotation("checksum/apm-custom-config", "b");
        assert_eq!(
            managers.annotation().get("checksum/apm-custom-config"),
            Some("b")
        );
    }
}
