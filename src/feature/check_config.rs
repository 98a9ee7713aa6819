//! Check configuration shipped to the agents through a ConfigMap.
//!
//! Several features configure a cluster-level check (orchestrator explorer,
//! kube-state-metrics core, helm). Each check reads one YAML file under
//! `conf.d/<check>.d`. The file comes from one of three places:
//!
//! - a ConfigMap the user references in `conf.configMap`, mounted as is;
//! - inline `conf.configData`, validated and written to a generated ConfigMap;
//! - the feature's default configuration, written to the same generated
//!   ConfigMap.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::{ChecksumAnnotation, FeatureError, FeatureId, Result};
use crate::crd::{AgentContainerName, ComponentName, ConfigMapConfig, CustomConfig, DatadogAgent};
use crate::merger::volume::config_map_volume;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::volumes::{CONFD_VOLUME_PATH, CONFIG_VOLUME_PATH};

/// Where one check gets its configuration file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckConfig {
    pub feature: FeatureId,
    pub namespace: String,
    /// ConfigMap mounted into the agent, generated or user provided.
    pub config_map_name: String,
    pub volume_name: &'static str,
    /// `orchestrator.d`, `kubernetes_state_core.d`, ...
    pub folder: &'static str,
    /// File name inside the generated ConfigMap.
    pub file_name: &'static str,
    pub user_config_map: Option<ConfigMapConfig>,
    pub config_data: Option<String>,
}

impl CheckConfig {
    pub fn new(
        dda: &DatadogAgent,
        feature: FeatureId,
        default_suffix: &str,
        volume_name: &'static str,
        folder: &'static str,
        file_name: &'static str,
        custom: Option<&CustomConfig>,
    ) -> Self {
        let user_config_map = custom.and_then(|c| c.config_map.clone());
        let config_map_name = match &user_config_map {
            Some(cm) => cm.name.clone(),
            None => default_config_map_name(dda, default_suffix),
        };
        Self {
            feature,
            namespace: dda.namespace().unwrap_or_default(),
            config_map_name,
            volume_name,
            folder,
            file_name,
            config_data: custom
                .filter(|c| c.config_map.is_none())
                .and_then(|c| c.config_data.clone()),
            user_config_map,
        }
    }

    pub fn mount_path(&self) -> String {
        format!("{CONFIG_VOLUME_PATH}{CONFD_VOLUME_PATH}/{}", self.folder)
    }

    /// Whether the operator writes the ConfigMap itself.
    pub fn is_generated(&self) -> bool {
        self.user_config_map.is_none()
    }

    /// Inline configuration, checked to be valid YAML.
    pub fn parsed_config_data(&self) -> Result<Option<String>> {
        let Some(data) = &self.config_data else {
            return Ok(None);
        };
        serde_yaml::from_str::<serde_yaml::Value>(data).map_err(|source| FeatureError::Parse {
            feature: self.feature,
            what: "custom check configuration",
            source,
        })?;
        Ok(Some(data.clone()))
    }

    /// ConfigMap holding `content` under the check's file name.
    pub fn build_config_map(&self, content: String) -> ConfigMap {
        config_map(
            &self.namespace,
            &self.config_map_name,
            BTreeMap::from([(self.file_name.to_string(), content)]),
        )
    }

    /// Store the generated ConfigMap, stamped with the checksum if any.
    pub fn add_config_map(
        &self,
        managers: &mut ResourceManagers,
        mut config_map: ConfigMap,
        checksum: Option<&ChecksumAnnotation>,
    ) {
        if let Some(checksum) = checksum {
            config_map
                .annotations_mut()
                .insert(checksum.key.clone(), checksum.value.clone());
        }
        managers.store().add_or_update(config_map);
    }

    /// Mount the configuration into `container`.
    pub fn mount(&self, managers: &mut PodTemplateManagers, container: AgentContainerName) {
        let items = self
            .user_config_map
            .as_ref()
            .map(|cm| cm.items.clone())
            .unwrap_or_default();
        let (volume, mount) = config_map_volume(
            self.volume_name,
            &self.config_map_name,
            items,
            &self.mount_path(),
        );
        managers.volume().add_volume(volume);
        managers
            .volume_mount()
            .add_volume_mount_to_container(mount, container);
    }
}

/// `<dda>-<suffix>`
pub fn default_config_map_name(dda: &DatadogAgent, suffix: &str) -> String {
    format!("{}-{suffix}", dda.name_any())
}

pub fn config_map(namespace: &str, name: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Hash of a feature's configuration section as a checksum annotation.
///
/// A section that cannot be hashed only costs the restart on change, so the
/// failure is logged and no annotation is produced.
pub fn checksum_for<T: serde::Serialize + ?Sized>(
    component: ComponentName,
    feature: FeatureId,
    section: &T,
) -> Option<ChecksumAnnotation> {
    match crate::hash::generate_md5_for_spec(section) {
        Ok(hash) => Some(ChecksumAnnotation::new(component, feature, hash)),
        Err(error) => {
            tracing::warn!(feature, %error, "failed to hash custom configuration");
            None
        }
    }
}
